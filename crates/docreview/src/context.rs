use anyhow::Result;
use docreview_llm::{CompletionProvider, LlmRequest};
use docreview_skills::{AgentInternals, ContextError, ContextField};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const PARTIES_PROMPT: &str = "You analyse business proposals. Identify the two parties: the consultancy, which wrote the proposal \
(look for a project manager or contact details), and the client, which receives it. Identify the problem statement the proposal \
addresses and the final deliverable the consultancy will produce. Answer with a JSON object using exactly these keys:\n\
{\"client\": \"name of the client organisation\", \
\"client_background\": \"relevant background on the client found in the proposal\", \
\"consultancy\": \"name of the organisation writing the proposal\", \
\"problem_statement\": \"the problem statement, often phrased as 'How might we'\", \
\"consultancy_task\": \"a name for the final deliverable, five words at most\"}\n\
Use only information from the document and return nothing outside the JSON object.";

const RESEARCH_QUESTIONS_PROMPT: &str = "You will receive a consultancy's proposal for a client. Find the research questions \
section. The questions are grouped by the category of documents they concern. Repeat every question verbatim and answer with a \
JSON object mapping each group name to its list of questions, for example \
{\"document subset 1\": [\"question 1\", \"question 2\"], \"document subset 2\": [\"question 3\"]}. \
Return nothing outside the JSON object.";

const THEMATIC_AREAS_PROMPT: &str = "You will receive a consultancy's proposal for a client. Find the thematic areas of the \
research and repeat them verbatim. Answer with a JSON object of the form {\"thematic_areas\": [\"theme 1\", \"theme 2\"]}. \
Return nothing outside the JSON object.";

/// Outcome of a bounded JSON-mode extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed(Map<String, Value>),
    Exhausted { attempts: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFields {
    pub client: String,
    pub client_background: String,
    pub consultancy: String,
    pub problem_statement: String,
    pub consultancy_task: String,
    pub research_questions: String,
    pub thematic_areas: String,
}

impl ContextFields {
    pub fn get(&self, field: ContextField) -> &str {
        match field {
            ContextField::Client => &self.client,
            ContextField::ClientBackground => &self.client_background,
            ContextField::Consultancy => &self.consultancy,
            ContextField::ProblemStatement => &self.problem_statement,
            ContextField::ConsultancyTask => &self.consultancy_task,
            ContextField::ResearchQuestions => &self.research_questions,
            ContextField::ThematicAreas => &self.thematic_areas,
        }
    }
}

/// The persisted context blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub research_plan_text: String,
    pub context: ContextFields,
    pub agent_internals: AgentInternals,
}

impl ProjectContext {
    /// Internals keyed by the configured markers. Blobs written with other
    /// markers keep their replacements.
    pub fn internals_for(&self, markers: &AgentInternals) -> Result<AgentInternals, ContextError> {
        if self.agent_internals.is_empty() {
            return Err(ContextError::MissingInternals);
        }
        Ok(markers.with_replacements(|field| {
            self.agent_internals
                .replacement(field)
                .map(str::to_string)
        }))
    }
}

/// Asks for a JSON object up to `max_attempts` times, without backoff.
/// Provider errors and unparseable replies both use up an attempt.
pub async fn extract_json(
    llm: &dyn CompletionProvider,
    system: &str,
    text: &str,
    max_attempts: usize,
) -> Extraction {
    let request = LlmRequest::new(system, text).json();
    for attempt in 1..=max_attempts {
        match llm.complete(&request).await {
            Ok(response) => match serde_json::from_str::<Value>(&response.content) {
                Ok(Value::Object(map)) => return Extraction::Parsed(map),
                Ok(_) => tracing::warn!(attempt, "extraction reply is not a JSON object"),
                Err(err) => tracing::warn!(attempt, error = %err, "extraction reply is not JSON"),
            },
            Err(err) => tracing::warn!(attempt, error = %format!("{err:#}"), "extraction request failed"),
        }
    }
    Extraction::Exhausted {
        attempts: max_attempts,
    }
}

/// Renders list-valued answers as `"Key name:\n- item\n\n"` blocks.
pub fn build_string(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(&display_key(key));
        out.push_str(":\n");
        let items: Vec<String> = match value {
            Value::Array(items) => items.iter().map(value_text).collect(),
            other => vec![value_text(other)],
        };
        for item in items {
            out.push_str("- ");
            out.push_str(&item);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

fn display_key(key: &str) -> String {
    let lowered = key.to_lowercase().replace('_', " ");
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).map(value_text).unwrap_or_default()
}

fn parsed(extraction: Extraction, step: &str) -> Result<Map<String, Value>, ContextError> {
    match extraction {
        Extraction::Parsed(map) => Ok(map),
        Extraction::Exhausted { attempts } => Err(ContextError::Exhausted {
            step: step.to_string(),
            attempts,
        }),
    }
}

/// Runs the three extraction calls against the proposal text and fills the
/// configured markers with the results.
pub async fn build_context(
    llm: &dyn CompletionProvider,
    research_plan_text: &str,
    markers: &AgentInternals,
    max_attempts: usize,
) -> Result<ProjectContext, ContextError> {
    let parties = parsed(
        extract_json(llm, PARTIES_PROMPT, research_plan_text, max_attempts).await,
        "parties",
    )?;
    let questions = parsed(
        extract_json(llm, RESEARCH_QUESTIONS_PROMPT, research_plan_text, max_attempts).await,
        "research questions",
    )?;
    let themes = parsed(
        extract_json(llm, THEMATIC_AREAS_PROMPT, research_plan_text, max_attempts).await,
        "thematic areas",
    )?;

    let context = ContextFields {
        client: text_field(&parties, "client"),
        client_background: text_field(&parties, "client_background"),
        consultancy: text_field(&parties, "consultancy"),
        problem_statement: text_field(&parties, "problem_statement"),
        consultancy_task: text_field(&parties, "consultancy_task"),
        research_questions: build_string(&questions),
        thematic_areas: build_string(&themes),
    };
    let agent_internals = markers.with_replacements(|field| Some(context.get(field).to_string()));
    Ok(ProjectContext {
        research_plan_text: research_plan_text.to_string(),
        context,
        agent_internals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use docreview_llm::LlmResponse;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Replies with the scripted answers in order, then repeats the last.
    struct Scripted {
        replies: Vec<Result<String, String>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
            assert_eq!(request.response_format, docreview_llm::ResponseFormat::JsonObject);
            let mut calls = self.calls.lock();
            let idx = (*calls).min(self.replies.len() - 1);
            *calls += 1;
            match &self.replies[idx] {
                Ok(text) => Ok(LlmResponse::text(text.clone())),
                Err(err) => Err(anyhow!(err.clone())),
            }
        }
    }

    #[tokio::test]
    async fn stops_at_first_parseable_attempt() {
        let llm = Scripted::new(vec![Err("timeout"), Ok("not json"), Ok("[1]"), Ok(r#"{"a": 1}"#)]);
        let extraction = extract_json(&llm, "sys", "text", 10).await;
        assert_eq!(
            extraction,
            Extraction::Parsed(json!({"a": 1}).as_object().unwrap().clone())
        );
        assert_eq!(*llm.calls.lock(), 4);
    }

    #[tokio::test]
    async fn reports_exhaustion() {
        let llm = Scripted::new(vec![Ok("nope")]);
        let extraction = extract_json(&llm, "sys", "text", 3).await;
        assert_eq!(extraction, Extraction::Exhausted { attempts: 3 });
        assert_eq!(*llm.calls.lock(), 3);

        let err = build_context(&llm, "plan", &AgentInternals::named(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Exhausted { attempts: 2, .. }));
    }

    #[test]
    fn list_answers_render_as_bullets() {
        let map = json!({
            "transit_plans": ["How many riders?", "What does it cost?"],
            "housing": ["Where to build?"]
        });
        let rendered = build_string(map.as_object().unwrap());
        assert!(rendered.contains("Transit plans:\n- How many riders?\n- What does it cost?\n\n"));
        assert!(rendered.contains("Housing:\n- Where to build?\n\n"));
    }

    #[tokio::test]
    async fn context_fills_configured_markers() {
        let llm = SequenceLlm::new(vec![
            json!({"client": "City of Harbourview", "consultancy": "Northwind", "problem_statement": "How might we move people?"}),
            json!({"transit": ["How many riders?"]}),
            json!({"thematic_areas": ["Mobility", "Equity"]}),
        ]);
        let context = build_context(&llm, "plan text", &AgentInternals::named(), 10)
            .await
            .unwrap();
        assert_eq!(context.context.client, "City of Harbourview");
        assert_eq!(context.context.client_background, "");
        assert_eq!(context.context.research_questions, "Transit:\n- How many riders?\n\n");
        assert_eq!(
            context.agent_internals.get(ContextField::Client).unwrap().marker,
            "{{client}}"
        );
        assert_eq!(
            context.agent_internals.replacement(ContextField::ThematicAreas),
            Some("Thematic areas:\n- Mobility\n- Equity\n\n")
        );

        let legacy = context.internals_for(&AgentInternals::legacy()).unwrap();
        assert_eq!(legacy.get(ContextField::Client).unwrap().marker, "^");
        assert_eq!(legacy.replacement(ContextField::Client), Some("City of Harbourview"));

        let blob = serde_json::to_value(&context).unwrap();
        assert_eq!(blob["agent_internals"]["client"]["replacement"], "City of Harbourview");
        let back: ProjectContext = serde_json::from_value(blob).unwrap();
        assert_eq!(back, context);
    }

    struct SequenceLlm {
        replies: Mutex<Vec<Value>>,
    }

    impl SequenceLlm {
        fn new(mut replies: Vec<Value>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for SequenceLlm {
        fn model(&self) -> &str {
            "sequence"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
            let reply = self
                .replies
                .lock()
                .pop()
                .ok_or_else(|| anyhow!("no scripted reply left"))?;
            Ok(LlmResponse::text(reply.to_string()))
        }
    }
}
