use panorama_core::{Outcome, RunReport, TableSelection};
use panorama_extract::{CsvDatasource, Datasource, XlsDatasource};

use crate::helpers::{datasource, TestLake};

fn csv_settings(location: &std::path::Path, tables: &str) -> panorama_core::DatasourceSettings {
    datasource(&format!(
        "name: exports\ntype: csv\nlocation: {}\n{}",
        location.display(),
        tables
    ))
}

// ── CSV ─────────────────────────────────────────────────────────

#[tokio::test]
async fn csv_is_uploaded_as_is_without_registration() {
    let mut lake = TestLake::new();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("enrollments.csv");
    std::fs::write(&file, "user_id,course_id\n1,course-v1:OrgX+CS101+2024\n2,course-v1:OrgX+CS101+2024\n")
        .unwrap();

    let mut ds = CsvDatasource::new(&csv_settings(&file, "")).unwrap();
    assert_eq!(ds.table_name(), "enrollments");

    let mut report = RunReport::new();
    ds.extract_and_load(&mut lake.datalake, &TableSelection::all(), false, &mut report)
        .await
        .unwrap();

    let key = "openedx/enrollments/lms=lms.example.org/enrollments.csv";
    assert_eq!(lake.keys().await, vec![key]);
    assert_eq!(
        lake.object_text(key).await,
        std::fs::read_to_string(&file).unwrap()
    );
    assert!(lake.queries.statements().is_empty());
    assert!(matches!(report.outcomes()[0].outcome, Outcome::Uploaded { rows: 2 }));
    // the source file is not a work file and stays put
    assert!(file.exists());
}

#[tokio::test]
async fn csv_fields_come_from_the_header_unless_declared() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("export.csv");
    std::fs::write(&file, "user_id,email\n1,a@example.org\n").unwrap();

    let mut sniffed = CsvDatasource::new(&csv_settings(&file, "")).unwrap();
    let fields = sniffed.fields("export", false).await.unwrap();
    let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["user_id", "email"]);
    assert!(fields.iter().all(|f| f.field_type == "string"));

    let declared = "tables:\n  - name: users\n    fields:\n      - { name: user_id, type: int }\n";
    let mut ds = CsvDatasource::new(&csv_settings(&file, declared)).unwrap();
    assert_eq!(ds.table_name(), "users");
    assert_eq!(ds.tables().await.unwrap(), vec!["users"]);
    let fields = ds.fields("users", false).await.unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].field_type, "int");
    assert_eq!(ds.fields("users", true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn csv_outside_the_selection_is_skipped() {
    let mut lake = TestLake::new();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("enrollments.csv");
    std::fs::write(&file, "a\n1\n").unwrap();

    let mut ds = CsvDatasource::new(&csv_settings(&file, "")).unwrap();
    let selection = TableSelection::from_flags(false, None, Some("grades")).unwrap();
    let mut report = RunReport::new();
    ds.extract_and_load(&mut lake.datalake, &selection, false, &mut report)
        .await
        .unwrap();

    assert!(lake.keys().await.is_empty());
    assert!(report.outcomes().is_empty());
}

#[tokio::test]
async fn missing_files_fail_the_connection_check() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.csv");

    let ds = CsvDatasource::new(&csv_settings(&missing, "")).unwrap();
    let checks = ds.test_connection().await;
    assert_eq!(
        checks[0].to_string(),
        format!("CSV: File {} not found", missing.display())
    );

    let xls = datasource(&format!(
        "name: sheets\ntype: xls\nlocation: {}\n",
        dir.path().join("gone.xlsx").display()
    ));
    let ds = XlsDatasource::new(&xls, dir.path().to_path_buf()).unwrap();
    assert!(!ds.test_connection().await[0].is_ok());
}

#[tokio::test]
async fn unreadable_workbook_fails_each_configured_sheet() {
    let mut lake = TestLake::new();
    let dir = tempfile::tempdir().unwrap();
    let xls = datasource(&format!(
        "name: sheets\ntype: xls\nlocation: {}\ntables:\n  - name: Learners\n  - name: Cohorts\n",
        dir.path().join("gone.xlsx").display()
    ));
    let mut ds = XlsDatasource::new(&xls, lake.work_dir.path().to_path_buf()).unwrap();
    let mut report = RunReport::new();

    ds.extract_and_load(&mut lake.datalake, &TableSelection::all(), false, &mut report)
        .await
        .unwrap();

    let failed: Vec<_> = report.failures().map(|o| o.table.as_str()).collect();
    assert_eq!(failed, vec!["Learners", "Cohorts"]);
    assert!(lake.keys().await.is_empty());
}

#[test]
fn location_is_required() {
    let settings = datasource("name: exports\ntype: csv\n");
    assert!(CsvDatasource::new(&settings).is_err());
}
