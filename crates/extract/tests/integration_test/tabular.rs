use std::sync::Arc;

use panorama_core::{CellValue, Outcome, RunReport, TableSelection};
use panorama_extract::{Datasource, MySqlDatasource};

use crate::helpers::{datasource, text, FakeRelational, TestLake};

const GRADES: &str = r#"
name: edxapp
type: mysql
mysql_database: edxapp
tables:
  - name: grades
    fields:
      - { name: id, type: int }
      - { name: course_id, type: varchar }
      - { name: grade, type: double }
    partitions:
      partition_fields: [course_id]
      interval: 2 hour
      timestamp_field: modified
  - name: auth_user
    fields:
      - { name: id, type: int }
      - { name: username, type: varchar }
"#;

const COURSES: [&str; 3] = [
    "course-v1:OrgX+CS101+2024",
    "course-v1:OrgX+CS102+2024",
    "course-v1:OrgY+MA201+2023",
];

fn grades_source() -> FakeRelational {
    let mut fake = FakeRelational::new().on(
        "select distinct `course_id` from `grades`",
        COURSES.iter().map(|c| vec![text(c)]).collect(),
    );
    for (i, c) in COURSES.iter().enumerate() {
        fake = fake.on(
            &format!("`course_id` = '{}'", c),
            vec![vec![CellValue::Integer(i as i64 + 1), CellValue::Float(0.5)]],
        );
    }
    fake
}

fn grades_only() -> TableSelection {
    TableSelection::from_flags(false, None, Some("grades")).unwrap()
}

fn encoded(course: &str) -> String {
    course.replace(':', "%3A").replace('+', "%2B")
}

// ── Partitioned tables ──────────────────────────────────────────

#[tokio::test]
async fn each_recent_tuple_gets_its_own_upload_and_registration() {
    let mut lake = TestLake::new();
    let fake = Arc::new(grades_source());
    let mut ds = MySqlDatasource::new(&datasource(GRADES), fake.clone(), lake.work_dir.path().to_path_buf());
    let mut report = RunReport::new();

    ds.extract_and_load(&mut lake.datalake, &grades_only(), false, &mut report)
        .await
        .unwrap();

    let distinct = fake.queries_containing("select distinct");
    assert_eq!(
        distinct,
        vec!["select distinct `course_id` from `grades` where `modified` >= date_sub(now(), interval 2 hour)"]
    );

    let keys = lake.keys().await;
    assert_eq!(keys.len(), 3);
    for c in COURSES {
        let key = format!(
            "openedx/grades/lms=lms.example.org/course_id={}/grades.csv",
            encoded(c)
        );
        assert!(keys.contains(&key), "missing {}", key);
        assert_eq!(
            fake.queries_containing(&format!("`course_id` = '{}'", c)),
            vec![format!("select `id`,`grade` from `grades` where `course_id` = '{}'", c)]
        );
    }

    let stmts = lake.queries.statements();
    assert_eq!(stmts.len(), 3);
    for (stmt, c) in stmts.iter().zip(COURSES) {
        assert!(stmt.starts_with("ALTER TABLE `openedx_raw_grades` ADD IF NOT EXISTS PARTITION"));
        assert!(stmt.contains(&format!("course_id = '{}'", c)));
    }

    assert_eq!(report.upload_count(), 3);
    assert!(!report.has_failures());
    assert_eq!(lake.work_files(), 0);
}

#[tokio::test]
async fn partition_columns_are_left_out_of_the_file() {
    let mut lake = TestLake::new();
    let fake = Arc::new(grades_source());
    let mut ds = MySqlDatasource::new(&datasource(GRADES), fake, lake.work_dir.path().to_path_buf());
    let mut report = RunReport::new();

    ds.extract_and_load(&mut lake.datalake, &grades_only(), false, &mut report)
        .await
        .unwrap();

    let key = format!(
        "openedx/grades/lms=lms.example.org/course_id={}/grades.csv",
        encoded(COURSES[0])
    );
    assert_eq!(lake.object_text(&key).await, "id,grade\n1,0.5\n");
}

#[tokio::test]
async fn force_drops_the_window() {
    let mut lake = TestLake::new();
    let fake = Arc::new(grades_source());
    let mut ds = MySqlDatasource::new(&datasource(GRADES), fake.clone(), lake.work_dir.path().to_path_buf());
    let mut report = RunReport::new();

    ds.extract_and_load(&mut lake.datalake, &grades_only(), true, &mut report)
        .await
        .unwrap();

    assert_eq!(
        fake.queries_containing("select distinct"),
        vec!["select distinct `course_id` from `grades`"]
    );
    assert_eq!(report.upload_count(), 3);
}

#[tokio::test]
async fn failing_tuple_aborts_the_rest_of_the_table() {
    let mut lake = TestLake::new();
    let fake = Arc::new(
        FakeRelational::new()
            .on(
                "select distinct",
                COURSES.iter().map(|c| vec![text(c)]).collect(),
            )
            .fail_on(&format!("`course_id` = '{}'", COURSES[1]), "lost connection")
            .on("`course_id` = ", vec![vec![CellValue::Integer(1), CellValue::Float(1.0)]])
            .on("from `auth_user`", vec![vec![CellValue::Integer(7), text("ada")]]),
    );
    let mut ds = MySqlDatasource::new(&datasource(GRADES), fake.clone(), lake.work_dir.path().to_path_buf());
    let mut report = RunReport::new();

    ds.extract_and_load(&mut lake.datalake, &TableSelection::all(), false, &mut report)
        .await
        .unwrap();

    // first tuple landed and stays registered, third never queried
    assert!(fake
        .queries_containing(&format!("`course_id` = '{}'", COURSES[2]))
        .is_empty());
    let grades: Vec<_> = report.for_table("grades").collect();
    assert_eq!(grades.len(), 2);
    assert!(matches!(grades[0].outcome, Outcome::Uploaded { rows: 1 }));
    assert!(matches!(grades[1].outcome, Outcome::Failed { .. }));
    assert_eq!(grades[1].partition.as_deref(), Some("course_id=course-v1:OrgX+CS102+2024"));

    // the next table still runs
    let users: Vec<_> = report.for_table("auth_user").collect();
    assert_eq!(users.len(), 1);
    assert!(matches!(users[0].outcome, Outcome::Uploaded { rows: 1 }));
    assert!(report.has_failures());
    assert_eq!(lake.work_files(), 0);
}

// ── Unpartitioned tables ────────────────────────────────────────

#[tokio::test]
async fn unpartitioned_table_is_uploaded_once_in_full() {
    let mut lake = TestLake::new();
    let fake = Arc::new(FakeRelational::new().on(
        "from `auth_user`",
        vec![
            vec![CellValue::Integer(1), text("ada")],
            vec![CellValue::Integer(2), text("C:\\new")],
        ],
    ));
    let mut ds = MySqlDatasource::new(&datasource(GRADES), fake.clone(), lake.work_dir.path().to_path_buf());
    let mut report = RunReport::new();
    let selection = TableSelection::from_flags(false, None, Some("auth_user")).unwrap();

    ds.extract_and_load(&mut lake.datalake, &selection, false, &mut report)
        .await
        .unwrap();

    assert_eq!(fake.queries(), vec!["select `id`,`username` from `auth_user`"]);
    let keys = lake.keys().await;
    assert_eq!(keys, vec!["openedx/auth_user/lms=lms.example.org/auth_user.csv"]);
    // literal backslash-n is doubled on the way out
    assert_eq!(lake.object_text(&keys[0]).await, "id,username\n1,ada\n2,C:\\\\new\n");
    assert_eq!(report.upload_count(), 1);
}

#[tokio::test]
async fn undeclared_fields_are_queried_once_and_cached() {
    let mut lake = TestLake::new();
    let fake = Arc::new(
        FakeRelational::new()
            .on(
                "INFORMATION_SCHEMA.COLUMNS",
                vec![
                    vec![text("id"), text("int")],
                    vec![text("title"), text("varchar")],
                ],
            )
            .on("from `courses`", vec![vec![CellValue::Integer(1), text("Intro")]]),
    );
    let settings = datasource(
        r#"
name: edxapp
type: mysql
mysql_database: edxapp
tables:
  - name: courses
"#,
    );
    let mut ds = MySqlDatasource::new(&settings, fake.clone(), lake.work_dir.path().to_path_buf());

    let fields = ds.fields("courses", false).await.unwrap();
    assert_eq!(fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(), vec!["id", "title"]);
    assert_eq!(fields[0].field_type, "int");

    let mut report = RunReport::new();
    ds.extract_and_load(&mut lake.datalake, &TableSelection::all(), false, &mut report)
        .await
        .unwrap();

    assert_eq!(fake.queries_containing("INFORMATION_SCHEMA").len(), 1);
    assert!(fake.queries_containing("INFORMATION_SCHEMA")[0]
        .contains("TABLE_NAME = 'courses' and TABLE_SCHEMA = 'edxapp'"));
    assert_eq!(report.upload_count(), 1);
}

// ── Connection and listing ──────────────────────────────────────

#[tokio::test]
async fn connection_check_looks_for_the_database() {
    let settings = datasource(GRADES);
    let dir = tempfile::tempdir().unwrap();

    let found = Arc::new(FakeRelational::new().on(
        "SHOW DATABASES",
        vec![vec![text("information_schema")], vec![text("edxapp")]],
    ));
    let ds = MySqlDatasource::new(&settings, found, dir.path().to_path_buf());
    let checks = ds.test_connection().await;
    assert_eq!(checks.len(), 1);
    assert!(checks[0].is_ok());

    let missing = Arc::new(FakeRelational::new().on("SHOW DATABASES", vec![vec![text("other")]]));
    let ds = MySqlDatasource::new(&settings, missing, dir.path().to_path_buf());
    assert_eq!(ds.test_connection().await[0].to_string(), "MySQL: DB not found");
}

#[tokio::test]
async fn tables_come_from_the_source() {
    let fake = Arc::new(FakeRelational::new().on(
        "SHOW TABLES",
        vec![vec![text("auth_user")], vec![text("grades")]],
    ));
    let dir = tempfile::tempdir().unwrap();
    let ds = MySqlDatasource::new(&datasource(GRADES), fake, dir.path().to_path_buf());
    assert_eq!(ds.tables().await.unwrap(), vec!["auth_user", "grades"]);
}
