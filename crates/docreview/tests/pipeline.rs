use anyhow::Result;
use async_trait::async_trait;
use docreview::blob::{get_json, BlobStore, MemoryBlobStore};
use docreview::config::PipelineConfig;
use docreview::context::ProjectContext;
use docreview::pipeline::{Pipeline, Services, SkillRecord};
use docreview::publish::{PageDraft, PagePublisher};
use docreview_index::ProjectIndex;
use docreview_llm::{CompletionProvider, LlmRequest, LlmResponse, ResponseFormat};
use docreview_rag::EmbeddingClient;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;

const PROJECT: &str = "city/p1";

#[derive(Default)]
struct FakeLlm {
    json_calls: Mutex<usize>,
    text_calls: Mutex<Vec<LlmRequest>>,
}

#[async_trait]
impl CompletionProvider for FakeLlm {
    fn model(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if request.response_format == ResponseFormat::JsonObject {
            *self.json_calls.lock() += 1;
            let system = request.system.clone().unwrap_or_default();
            let reply = if system.contains("thematic areas") {
                json!({"thematic_areas": ["Mobility"]})
            } else if system.contains("research questions") {
                json!({"transit": ["How many riders use the bus?", "What does the plan cost?"]})
            } else {
                json!({
                    "client": "City of Harbourview",
                    "consultancy": "Northwind Advisory",
                    "problem_statement": "How might we cut commute times?",
                    "consultancy_task": "Transit review"
                })
            };
            return Ok(LlmResponse::text(reply.to_string()));
        }
        self.text_calls.lock().push(request.clone());
        Ok(LlmResponse::text("Findings: ridership is growing."))
    }
}

#[derive(Default)]
struct RecordingPublisher {
    /// (parent, title, id) per created page.
    pages: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl PagePublisher for RecordingPublisher {
    async fn create(&self, parent_id: &str, draft: &PageDraft) -> Result<String> {
        let mut pages = self.pages.lock();
        let id = format!("page-{}", pages.len() + 1);
        pages.push((parent_id.to_string(), draft.title.clone(), id.clone()));
        Ok(id)
    }
}

fn page_map(pages: &[&str]) -> Vec<u8> {
    let map: serde_json::Map<String, serde_json::Value> = pages
        .iter()
        .enumerate()
        .map(|(idx, text)| ((idx + 1).to_string(), json!({ "text": text })))
        .collect();
    serde_json::to_vec(&map).unwrap()
}

fn seeded_store() -> MemoryBlobStore {
    let store = MemoryBlobStore::new();
    store.insert(
        "city/p1/proposal.json",
        page_map(&["Northwind Advisory proposes a transit review for the City of Harbourview."]),
    );
    store.insert(
        "city/p1/transit.json",
        page_map(&[
            "Bus ridership grew by a tenth last year. Most riders travel at peak hours.",
            "The new lanes cost four million. Funding comes from the regional budget.",
        ]),
    );
    store.insert(
        "city/p1/housing.json",
        page_map(&["New housing is planned along the northern corridor."]),
    );
    store.insert("city/p1/notes.docx", b"not a supported format".to_vec());
    store.insert("city/p1/archive/old.json", page_map(&["Archived material."]));
    store
}

fn config() -> PipelineConfig {
    let config = PipelineConfig::from_yaml("provider: local\nembedding_provider: hash\n").unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn failing_document_does_not_stop_siblings_or_answers() {
    let store = seeded_store();
    let llm = FakeLlm::default();
    let embedder = EmbeddingClient::hash();
    let publisher = RecordingPublisher::default();
    let config = config();
    let pipeline = Pipeline::new(
        &config,
        Services {
            store: &store,
            llm: &llm,
            embedder: &embedder,
            publisher: Some(&publisher),
        },
    )
    .unwrap();

    let report = pipeline
        .run(
            PROJECT,
            "proposal.json",
            &["summarization", "keypoints", "quotes"],
            Some("parent-page"),
            false,
        )
        .await
        .unwrap();

    assert_eq!(report.indexed, ["city/p1/housing.json", "city/p1/transit.json"]);
    assert_eq!(report.succeeded, ["city/p1/housing.json", "city/p1/transit.json"]);
    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|f| (f.document.as_str(), f.stage.as_str()))
        .collect();
    assert_eq!(
        failed,
        [("city/p1/notes.docx", "index"), ("city/p1/notes.docx", "skills")]
    );
    assert_eq!(report.answered, 2);
    // a page per document holding its three skill pages, then one page per question
    assert_eq!(report.pages, 10);
    let pages = publisher.pages.lock().clone();
    assert_eq!(pages.len(), 10);
    let (doc_parent, _, doc_page) = pages
        .iter()
        .find(|(_, title, _)| title == "transit")
        .unwrap();
    assert_eq!(doc_parent, "parent-page");
    let transit_skills: Vec<_> = pages
        .iter()
        .filter(|(_, title, _)| title.ends_with(" - transit.json"))
        .collect();
    assert_eq!(transit_skills.len(), 3);
    assert!(transit_skills.iter().all(|(parent, _, _)| parent == doc_page));
    assert!(pages
        .iter()
        .any(|(parent, title, _)| parent == "parent-page" && title == "What does the plan cost?"));

    let context: ProjectContext = get_json(&store, "city/p1/tmp/context.json").await.unwrap();
    assert_eq!(context.context.client, "City of Harbourview");
    assert_eq!(*llm.json_calls.lock(), 3);

    let index: ProjectIndex = get_json(&store, "city/p1/tmp/index.json").await.unwrap();
    assert_eq!(index.filenames(), ["housing.json", "transit.json"]);
    assert_eq!(index.textstore().len(), index.vectorstore().len());

    let record: SkillRecord = get_json(&store, "city/p1/tmp/skills/transit.json.json").await.unwrap();
    assert_eq!(
        record.skills.keys().collect::<Vec<_>>(),
        ["summarization", "keypoints", "quotes"]
    );
    assert!(record.skills.values().all(|outcome| outcome.is_completed()));
    assert!(!store.exists("city/p1/tmp/skills/notes.docx.json").await.unwrap());

    let answers: IndexMap<String, String> =
        get_json(&store, "city/p1/tmp/research_questions.json").await.unwrap();
    assert_eq!(
        answers.keys().collect::<Vec<_>>(),
        ["How many riders use the bus?", "What does the plan cost?"]
    );
    let grounded = llm
        .text_calls
        .lock()
        .iter()
        .filter(|req| req.user.contains("!!! START CHUNK !!!"))
        .count();
    assert_eq!(grounded, 2);
}

#[tokio::test]
async fn second_run_reuses_stored_blobs() {
    let store = seeded_store();
    let llm = FakeLlm::default();
    let embedder = EmbeddingClient::hash();
    let config = config();
    let pipeline = Pipeline::new(
        &config,
        Services {
            store: &store,
            llm: &llm,
            embedder: &embedder,
            publisher: None,
        },
    )
    .unwrap();

    let skills: [&str; 0] = [];
    let first = pipeline
        .run(PROJECT, "proposal.json", &skills, None, false)
        .await
        .unwrap();
    assert_eq!(first.pages, 0);
    let text_calls = llm.text_calls.lock().len();

    let index = pipeline
        .index_documents(PROJECT, &first.indexed, false)
        .await
        .unwrap();
    assert!(index.indexed.is_empty());
    assert_eq!(index.skipped, first.indexed);

    let second = pipeline
        .run(PROJECT, "proposal.json", &skills, None, false)
        .await
        .unwrap();
    assert!(second.indexed.is_empty());
    assert_eq!(second.answered, 2);
    assert_eq!(*llm.json_calls.lock(), 3);
    // only the skill chains run again; context and answers come from storage
    assert_eq!(llm.text_calls.lock().len(), text_calls * 2 - 2);
}

#[tokio::test]
async fn listing_skips_proposal_and_subfolders() {
    let store = seeded_store();
    let llm = FakeLlm::default();
    let embedder = EmbeddingClient::hash();
    let config = config();
    let pipeline = Pipeline::new(
        &config,
        Services {
            store: &store,
            llm: &llm,
            embedder: &embedder,
            publisher: None,
        },
    )
    .unwrap();

    let documents = pipeline
        .list_documents(PROJECT, Some("proposal.json"))
        .await
        .unwrap();
    assert_eq!(
        documents,
        ["city/p1/housing.json", "city/p1/notes.docx", "city/p1/transit.json"]
    );
}

#[tokio::test]
async fn documents_sharing_a_stem_keep_separate_records() {
    let store = MemoryBlobStore::new();
    store.insert("p/proposal.json", page_map(&["Northwind proposes a review."]));
    store.insert("p/report.json", page_map(&["Lower case report."]));
    store.insert("p/report.JSON", page_map(&["Upper case report."]));
    let llm = FakeLlm::default();
    let embedder = EmbeddingClient::hash();
    let config = config();
    let pipeline = Pipeline::new(
        &config,
        Services {
            store: &store,
            llm: &llm,
            embedder: &embedder,
            publisher: None,
        },
    )
    .unwrap();

    let report = pipeline
        .run("p", "proposal.json", &["summarization"], None, false)
        .await
        .unwrap();
    assert_eq!(report.succeeded.len(), 2);

    let lower: SkillRecord = get_json(&store, "p/tmp/skills/report.json.json").await.unwrap();
    let upper: SkillRecord = get_json(&store, "p/tmp/skills/report.JSON.json").await.unwrap();
    assert_eq!(lower.document, "p/report.json");
    assert_eq!(upper.document, "p/report.JSON");
}

struct FailingPublisher;

#[async_trait]
impl PagePublisher for FailingPublisher {
    async fn create(&self, _parent_id: &str, _draft: &PageDraft) -> Result<String> {
        Err(anyhow::anyhow!("notion unavailable"))
    }
}

#[tokio::test]
async fn answers_are_stored_only_after_publishing() {
    let store = seeded_store();
    let llm = FakeLlm::default();
    let embedder = EmbeddingClient::hash();
    let config = config();
    let offline = Pipeline::new(
        &config,
        Services {
            store: &store,
            llm: &llm,
            embedder: &embedder,
            publisher: None,
        },
    )
    .unwrap();
    offline
        .ensure_context(PROJECT, "proposal.json", false)
        .await
        .unwrap();

    let failing = FailingPublisher;
    let pipeline = Pipeline::new(
        &config,
        Services {
            store: &store,
            llm: &llm,
            embedder: &embedder,
            publisher: Some(&failing),
        },
    )
    .unwrap();
    assert!(pipeline
        .answer_questions(PROJECT, None, Some("parent-page"), false)
        .await
        .is_err());
    assert!(!store
        .exists("city/p1/tmp/research_questions.json")
        .await
        .unwrap());

    let (answers, pages) = offline
        .answer_questions(PROJECT, None, None, false)
        .await
        .unwrap();
    assert_eq!(answers.len(), 2);
    assert_eq!(pages, 0);
    assert!(store
        .exists("city/p1/tmp/research_questions.json")
        .await
        .unwrap());
}
