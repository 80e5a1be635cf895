use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};

use panorama_core::{CellValue, Outcome, RunReport, TableSelection};
use panorama_extract::structures::{ACTIVE_VERSIONS_COLLECTION, FIELDS, STRUCTURES_COLLECTION, TABLE};
use panorama_extract::{
    CourseStructuresDatasource, Datasource, ExtractError, MongoActiveVersions, RelationalSource,
    SplitModulestoreIndex,
};

use crate::helpers::{text, FakeDocuments, FakeRelational, TestLake};

const ROOT: &str = "course-v1:OrgX+CS101+2024";
const CHAPTER: &str = "block-v1:OrgX+CS101+2024+type@chapter+block@chapter1";
const VERTICAL: &str = "block-v1:OrgX+CS101+2024+type@vertical+block@vert1";
const VIDEO: &str = "block-v1:OrgX+CS101+2024+type@video+block@comp1";

fn block(block_type: &str, block_id: &str, name: &str, children: &[(&str, &str)]) -> Document {
    let children: Vec<Bson> = children
        .iter()
        .map(|(t, i)| Bson::Array(vec![Bson::String(t.to_string()), Bson::String(i.to_string())]))
        .collect();
    doc! {
        "block_id": block_id,
        "block_type": block_type,
        "fields": { "display_name": name, "children": children },
        "edit_info": { "edited_by": 4 },
    }
}

fn cs101_blocks() -> Vec<Document> {
    vec![
        block("course", "course", "Computer Science 101", &[("chapter", "chapter1")]),
        block("chapter", "chapter1", "Week 1", &[("vertical", "vert1")]),
        block("vertical", "vert1", "Intro", &[("video", "comp1")]),
        block("video", "comp1", "Welcome Video", &[]),
    ]
}

fn structure(id: ObjectId, blocks: Vec<Document>) -> Document {
    doc! { "_id": id, "root": ["course", "course"], "blocks": blocks }
}

fn active_version(id: ObjectId, org: &str, course: &str, run: &str) -> Document {
    doc! {
        "org": org,
        "course": course,
        "run": run,
        "versions": { "published-branch": id, "draft-branch": ObjectId::new() },
    }
}

fn mongo_datasource(docs: FakeDocuments, lake: &TestLake) -> CourseStructuresDatasource {
    let documents = Arc::new(docs);
    CourseStructuresDatasource::new(
        "courses",
        documents.clone(),
        Box::new(MongoActiveVersions::new(documents)),
        None,
        lake.work_dir.path().to_path_buf(),
    )
}

fn cs101(id: ObjectId) -> FakeDocuments {
    FakeDocuments::new()
        .with(ACTIVE_VERSIONS_COLLECTION, vec![active_version(id, "OrgX", "CS101", "2024")])
        .with(STRUCTURES_COLLECTION, vec![structure(id, cs101_blocks())])
}

fn column(row: &[CellValue], name: &str) -> CellValue {
    let idx = FIELDS.iter().position(|f| *f == name).unwrap();
    row[idx].clone()
}

// ── Reconstruction ──────────────────────────────────────────────

#[tokio::test]
async fn four_block_course_is_threaded_from_the_root() {
    let lake = TestLake::new();
    let ds = mongo_datasource(cs101(ObjectId::new()), &lake);
    let mut report = RunReport::new();

    let rebuilt = ds.reconstruct(&mut report).await.unwrap();
    let rows = rebuilt.rows();
    assert_eq!(rows.len(), 4);

    let locations: Vec<&str> = rebuilt.blocks.keys().map(|k| k.as_str()).collect();
    assert_eq!(locations, vec![ROOT, CHAPTER, VERTICAL, VIDEO]);

    let video = &rows[3];
    assert_eq!(column(video, "component"), text("Welcome Video"));
    assert_eq!(column(video, "chapter"), text("Week 1"));
    assert_eq!(column(video, "vertical"), text("Intro"));
    assert_eq!(column(video, "course_name"), text("Computer Science 101"));
    assert_eq!(column(video, "parent"), text(VERTICAL));
    assert_eq!(column(video, "sequential"), CellValue::Null);
    assert_eq!(column(video, "organization"), text("OrgX"));
    assert_eq!(column(video, "course_edition"), text("2024"));

    let root = &rows[0];
    assert_eq!(column(root, "module_location"), text(ROOT));
    assert_eq!(column(root, "parent"), CellValue::Null);
    assert_eq!(column(root, "component"), CellValue::Null);

    // containers are never components
    assert_eq!(column(&rows[2], "component"), CellValue::Null);
    assert!(report.anomalies().is_empty());
}

#[tokio::test]
async fn every_block_is_kept_with_exactly_one_root() {
    let id = ObjectId::new();
    let mut blocks = cs101_blocks();
    blocks[0] = block(
        "course",
        "course",
        "Computer Science 101",
        &[("chapter", "chapter1"), ("chapter", "chapter2")],
    );
    blocks.push(block("chapter", "chapter2", "Week 2", &[("sequential", "seq2")]));
    blocks.push(block("sequential", "seq2", "Quiz", &[("problem", "p1"), ("html", "h1")]));
    blocks.push(block("problem", "p1", "Question 1", &[]));
    blocks.push(block("html", "h1", "Notes", &[]));
    let n = blocks.len();

    let docs = FakeDocuments::new()
        .with(ACTIVE_VERSIONS_COLLECTION, vec![active_version(id, "OrgX", "CS101", "2024")])
        .with(STRUCTURES_COLLECTION, vec![structure(id, blocks)]);
    let lake = TestLake::new();
    let ds = mongo_datasource(docs, &lake);

    let rebuilt = ds.reconstruct(&mut RunReport::new()).await.unwrap();
    assert_eq!(rebuilt.blocks.len(), n);
    let roots: Vec<_> = rebuilt
        .blocks
        .values()
        .filter(|b| b.block_type == "course")
        .collect();
    assert_eq!(roots.len(), 1);
    assert!(roots[0].parent.is_none());
    assert!(rebuilt
        .blocks
        .values()
        .filter(|b| b.block_type != "course")
        .all(|b| b.parent.is_some()));

    let p1 = &rebuilt.blocks["block-v1:OrgX+CS101+2024+type@problem+block@p1"];
    assert_eq!(p1.lineage.sequential.as_deref(), Some("Quiz"));
    assert_eq!(p1.lineage.chapter.as_deref(), Some("Week 2"));
    assert_eq!(p1.lineage.vertical, None);
    assert_eq!(p1.component_name.as_deref(), Some("Question 1"));
}

#[tokio::test]
async fn reconstruction_is_repeatable() {
    let id = ObjectId::new();
    let lake = TestLake::new();
    let ds = mongo_datasource(cs101(id), &lake);

    let first = ds.reconstruct(&mut RunReport::new()).await.unwrap().rows();
    let second = ds.reconstruct(&mut RunReport::new()).await.unwrap().rows();
    assert_eq!(first, second);
}

#[tokio::test]
async fn cyclic_children_are_detected() {
    let id = ObjectId::new();
    let blocks = vec![
        block("course", "course", "Loop", &[("chapter", "a")]),
        block("chapter", "a", "A", &[("sequential", "b")]),
        block("sequential", "b", "B", &[("chapter", "a")]),
    ];
    let docs = FakeDocuments::new()
        .with(ACTIVE_VERSIONS_COLLECTION, vec![active_version(id, "OrgX", "CS101", "2024")])
        .with(STRUCTURES_COLLECTION, vec![structure(id, blocks)]);
    let lake = TestLake::new();
    let ds = mongo_datasource(docs, &lake);

    match ds.reconstruct(&mut RunReport::new()).await {
        Err(ExtractError::CycleDetected { location }) => {
            assert_eq!(location, "block-v1:OrgX+CS101+2024+type@chapter+block@a");
        }
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("cycle not detected"),
    }
}

// ── Anomalies ───────────────────────────────────────────────────

#[tokio::test]
async fn missing_root_and_count_mismatch_are_reported() {
    let with_root = ObjectId::new();
    let rootless = ObjectId::new();
    let never_fetched = ObjectId::new();
    let docs = FakeDocuments::new()
        .with(
            ACTIVE_VERSIONS_COLLECTION,
            vec![
                active_version(with_root, "OrgX", "CS101", "2024"),
                active_version(rootless, "OrgX", "CS102", "2024"),
                active_version(never_fetched, "OrgX", "CS103", "2024"),
            ],
        )
        .with(
            STRUCTURES_COLLECTION,
            vec![
                structure(with_root, cs101_blocks()),
                structure(
                    rootless,
                    vec![
                        block("chapter", "c1", "Orphan", &[("html", "h1")]),
                        block("html", "h1", "Text", &[]),
                    ],
                ),
            ],
        );
    let lake = TestLake::new();
    let ds = mongo_datasource(docs, &lake);
    let mut report = RunReport::new();

    let rebuilt = ds.reconstruct(&mut report).await.unwrap();
    assert_eq!(rebuilt.blocks.len(), 6);
    let orphan = &rebuilt.blocks["block-v1:OrgX+CS102+2024+type@html+block@h1"];
    assert!(orphan.parent.is_none());
    assert!(orphan.component_name.is_none());

    let messages: Vec<&str> = report.anomalies().iter().map(|a| a.message.as_str()).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("3 active versions but 2 course structures"));
    assert!(messages[1].contains("course-v1:OrgX+CS102+2024"));
}

#[tokio::test]
async fn no_active_versions_is_an_error() {
    let lake = TestLake::new();
    let ds = mongo_datasource(FakeDocuments::new(), &lake);
    assert!(matches!(
        ds.reconstruct(&mut RunReport::new()).await,
        Err(ExtractError::NoActiveVersions)
    ));
}

// ── Active version sources ──────────────────────────────────────

#[tokio::test]
async fn mongo_active_versions_filter_on_published_branch() {
    let id = ObjectId::new();
    let docs = Arc::new(cs101(id));
    let lake = TestLake::new();
    let ds = CourseStructuresDatasource::new(
        "courses",
        docs.clone(),
        Box::new(MongoActiveVersions::new(docs.clone())),
        None,
        lake.work_dir.path().to_path_buf(),
    );
    ds.reconstruct(&mut RunReport::new()).await.unwrap();

    let filters = docs.filters();
    assert_eq!(filters[0].0, ACTIVE_VERSIONS_COLLECTION);
    assert_eq!(filters[0].1, doc! { "versions.published-branch": { "$exists": true } });
    assert_eq!(filters[1].0, STRUCTURES_COLLECTION);
    assert_eq!(filters[1].1, doc! { "_id": { "$in": [id] } });
}

#[tokio::test]
async fn relational_index_parses_course_ids_by_delimiter() {
    let cs101 = ObjectId::new();
    let long_org = ObjectId::new();
    let relational = Arc::new(FakeRelational::new().on(
        "split_modulestore_django_splitmodulestorecourseindex",
        vec![
            vec![text(&cs101.to_hex()), text(ROOT)],
            vec![text(&long_org.to_hex()), text("course-v1:LongOrganizationName+X1+T2")],
            vec![CellValue::Null, text("library-v1:OrgX+Lib")],
            vec![text(&ObjectId::new().to_hex()), text("not-a-course")],
        ],
    ));
    let documents = Arc::new(FakeDocuments::new().with(
        STRUCTURES_COLLECTION,
        vec![
            structure(cs101, cs101_blocks()),
            structure(
                long_org,
                vec![block("course", "course", "Long", &[])],
            ),
        ],
    ));
    let lake = TestLake::new();
    let ds = CourseStructuresDatasource::new(
        "courses",
        documents,
        Box::new(SplitModulestoreIndex::new(relational.clone())),
        Some(relational.clone() as Arc<dyn RelationalSource>),
        lake.work_dir.path().to_path_buf(),
    );

    let mut report = RunReport::new();
    let rebuilt = ds.reconstruct(&mut report).await.unwrap();
    assert!(rebuilt.blocks.contains_key("course-v1:LongOrganizationName+X1+T2"));
    let long = &rebuilt.blocks["course-v1:LongOrganizationName+X1+T2"];
    assert_eq!(long.course.org, "LongOrganizationName");
    assert_eq!(rebuilt.blocks.len(), 5);
    assert!(report.anomalies().is_empty());

    assert_eq!(
        relational.queries_containing("split_modulestore")[0],
        "select published_version, course_id from split_modulestore_django_splitmodulestorecourseindex"
    );

    let checks = ds.test_connection().await;
    let labels: Vec<_> = checks.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["MongoDB", "MySQL"]);
}

// ── Upload ──────────────────────────────────────────────────────

#[tokio::test]
async fn one_file_with_every_block_is_uploaded_and_registered() {
    let mut lake = TestLake::new();
    let mut ds = mongo_datasource(cs101(ObjectId::new()), &lake);
    let mut report = RunReport::new();

    ds.extract_and_load(&mut lake.datalake, &TableSelection::all(), false, &mut report)
        .await
        .unwrap();

    let key = "openedx/course_structures/lms=lms.example.org/course_structures.csv";
    assert_eq!(lake.keys().await, vec![key]);
    let body = lake.object_text(key).await;
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], FIELDS.join(","));
    assert_eq!(
        lines[4],
        "block-v1:OrgX+CS101+2024+type@video+block@comp1,course-v1:OrgX+CS101+2024,OrgX,CS101,2024,\
         block-v1:OrgX+CS101+2024+type@vertical+block@vert1,video,comp1,Welcome Video,\
         Computer Science 101,Week 1,,Intro,,Welcome Video"
    );

    assert_eq!(lake.queries.statements().len(), 1);
    assert!(matches!(
        report.for_table(TABLE).next().map(|o| &o.outcome),
        Some(Outcome::Uploaded { rows: 4 })
    ));
    assert_eq!(lake.work_files(), 0);
}

#[tokio::test]
async fn fields_are_fixed() {
    let lake = TestLake::new();
    let mut ds = mongo_datasource(FakeDocuments::new(), &lake);
    let fields = ds.fields(TABLE, true).await.unwrap();
    assert_eq!(fields.len(), 15);
    assert!(fields.iter().all(|f| f.field_type == "varchar"));
    assert_eq!(ds.tables().await.unwrap(), vec![TABLE]);
}
