//! Knowledge Sub-agent (C6): web search, multi-source synthesis, and fact
//! verification. Search transport failures degrade to `success=false`
//! results rather than propagating — callers log and continue (§4.6).

mod search;

pub use search::{
    DuckDuckGoSearchClient, SearchClient, SearchResult, duckduckgo_search_url, extract_actual_url, parse_results,
    strip_html,
};

use serde::{Deserialize, Serialize};

use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, Message};
use crate::ai::utils::extract_confidence_from_llm_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Quick,
    Medium,
    Deep,
}

impl Depth {
    /// Number of queries generated for this depth (§4.6): 1, 2, or 4.
    fn query_count(self) -> usize {
        match self {
            Depth::Quick => 1,
            Depth::Medium => 2,
            Depth::Deep => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

fn confidence_from_score(score: f32) -> Confidence {
    if score >= 0.8 {
        Confidence::High
    } else if score >= 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub answer: String,
    pub insights: Vec<String>,
    pub confidence: Confidence,
    pub queries_used: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    True,
    False,
    Uncertain,
    NeedsMoreInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub verdict: Verdict,
    pub confidence: Confidence,
}

pub struct KnowledgeAgent<'a> {
    search_client: &'a dyn SearchClient,
    provider: &'a dyn LLMProvider,
    model: String,
}

impl<'a> KnowledgeAgent<'a> {
    pub fn new(search_client: &'a dyn SearchClient, provider: &'a dyn LLMProvider, model: impl Into<String>) -> Self {
        Self { search_client, provider, model: model.into() }
    }

    /// One external search call (§4.6). Transport failure returns
    /// `success=false` with an empty result list.
    pub async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        match self.search_client.search(query, max_results).await {
            Ok(results) => SearchOutcome { success: true, results },
            Err(_) => SearchOutcome { success: false, results: Vec::new() },
        }
    }

    /// Generates 1/2/4 queries per `depth`, concatenates top snippets, and
    /// synthesizes an answer via one more LLM call (§4.6). Synthesis
    /// failures degrade to the raw concatenated snippets.
    pub async fn research(&self, question: &str, depth: Depth, max_sources: usize) -> ResearchOutcome {
        let queries = self.generate_queries(question, depth).await;

        let mut snippets = Vec::new();
        for query in &queries {
            let outcome = self.search(query, max_sources).await;
            if outcome.success {
                for r in outcome.results.iter().take(max_sources) {
                    snippets.push(format!("- {}: {}", r.title, r.snippet));
                }
            }
        }

        let concatenated = snippets.join("\n");
        let synthesis_prompt = format!(
            "Question: {question}\n\nSources:\n{concatenated}\n\nSynthesize a concise answer, then list \
             3-5 bullet-point insights prefixed with '- '. State your overall confidence as \
             **Confidence**: High|Medium|Low at the end."
        );

        let request = CompletionRequest::new(&self.model, vec![Message::user(synthesis_prompt)]);
        match self.provider.complete(request).await {
            Ok(response) => {
                let insights = response
                    .content
                    .lines()
                    .filter(|l| l.trim_start().starts_with("- "))
                    .map(|l| l.trim_start().trim_start_matches("- ").to_string())
                    .collect();
                let score = extract_confidence_from_llm_response(&response.content);
                ResearchOutcome {
                    answer: response.content,
                    insights,
                    confidence: confidence_from_score(score),
                    queries_used: queries,
                }
            }
            Err(_) => ResearchOutcome {
                answer: concatenated,
                insights: snippets,
                confidence: Confidence::Low,
                queries_used: queries,
            },
        }
    }

    /// Constructs a search for `claim`, then classifies the evidence via one
    /// LLM call into a verdict and confidence (§4.6).
    pub async fn verify(&self, claim: &str, context: Option<&str>) -> VerificationOutcome {
        let outcome = self.search(claim, 5).await;
        let evidence: String = outcome
            .results
            .iter()
            .map(|r| format!("- {}: {}", r.title, r.snippet))
            .collect::<Vec<_>>()
            .join("\n");

        let context_line = context.map(|c| format!("\nContext: {c}")).unwrap_or_default();
        let prompt = format!(
            "Claim: {claim}{context_line}\n\nEvidence:\n{evidence}\n\nClassify this claim as exactly one of \
             true, false, uncertain, or needs_more_info. State the classification on its own line prefixed \
             with 'Verdict:', then state your confidence as **Confidence**: High|Medium|Low."
        );

        let request = CompletionRequest::new(&self.model, vec![Message::user(prompt)]);
        let content = match self.provider.complete(request).await {
            Ok(response) => response.content,
            Err(_) => String::new(),
        };

        let verdict = parse_verdict(&content);
        let score = extract_confidence_from_llm_response(&content);
        VerificationOutcome { verdict, confidence: confidence_from_score(score) }
    }

    async fn generate_queries(&self, question: &str, depth: Depth) -> Vec<String> {
        let count = depth.query_count();
        if count == 1 {
            return vec![question.to_string()];
        }

        let prompt = format!(
            "Generate exactly {count} distinct, specific web search queries to research the question \
             below. Respond with one query per line, no numbering.\n\nQuestion: {question}"
        );
        let request = CompletionRequest::new(&self.model, vec![Message::user(prompt)]);
        match self.provider.complete(request).await {
            Ok(response) => {
                let queries: Vec<String> = response
                    .content
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .take(count)
                    .collect();
                if queries.is_empty() { vec![question.to_string()] } else { queries }
            }
            Err(_) => vec![question.to_string()],
        }
    }
}

fn parse_verdict(content: &str) -> Verdict {
    let lower = content.to_lowercase();
    if lower.contains("verdict: true") || lower.contains("verdict:** true") {
        Verdict::True
    } else if lower.contains("verdict: false") || lower.contains("verdict:** false") {
        Verdict::False
    } else if lower.contains("needs_more_info") || lower.contains("needs more info") {
        Verdict::NeedsMoreInfo
    } else {
        Verdict::Uncertain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::ai::types::CompletionResponse;
    use crate::error::CoreError;

    struct FixedSearchClient {
        results: Vec<SearchResult>,
        fail: bool,
    }

    #[async_trait]
    impl SearchClient for FixedSearchClient {
        async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchResult>, CoreError> {
            if self.fail {
                return Err(CoreError::Transport("network down".to_string()));
            }
            Ok(self.results.iter().take(max_results).cloned().collect())
        }
    }

    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, CoreError> {
            if self.fail {
                return Err(CoreError::Provider("synthesis unavailable".to_string()));
            }
            let mut responses = self.responses.lock().expect("lock");
            let content = if responses.is_empty() { String::new() } else { responses.remove(0) };
            Ok(CompletionResponse { content, model: "test".to_string(), usage: None, finish_reason: None })
        }

        fn context_limit(&self) -> usize {
            8000
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    fn result(title: &str, snippet: &str) -> SearchResult {
        SearchResult { title: title.to_string(), snippet: snippet.to_string(), url: "https://example.com".to_string() }
    }

    #[tokio::test]
    async fn search_transport_failure_yields_unsuccessful_result() {
        let client = FixedSearchClient { results: vec![], fail: true };
        let provider = ScriptedProvider { responses: Mutex::new(vec![]), fail: false };
        let agent = KnowledgeAgent::new(&client, &provider, "test-model");
        let outcome = agent.search("rust async", 3).await;
        assert!(!outcome.success);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn quick_research_uses_single_query() {
        let client = FixedSearchClient { results: vec![result("a", "snippet a")], fail: false };
        let provider = ScriptedProvider {
            responses: Mutex::new(vec!["Answer text\n- insight one\n- insight two\n**Confidence**: High".to_string()]),
            fail: false,
        };
        let agent = KnowledgeAgent::new(&client, &provider, "test-model");
        let outcome = agent.research("what is rust ownership", Depth::Quick, 3).await;
        assert_eq!(outcome.queries_used.len(), 1);
        assert_eq!(outcome.confidence, Confidence::High);
        assert_eq!(outcome.insights.len(), 2);
    }

    #[tokio::test]
    async fn research_synthesis_failure_degrades_to_raw_snippets() {
        let client = FixedSearchClient { results: vec![result("a", "snippet a")], fail: false };
        let provider = ScriptedProvider { responses: Mutex::new(vec![]), fail: true };
        let agent = KnowledgeAgent::new(&client, &provider, "test-model");
        let outcome = agent.research("what is rust ownership", Depth::Quick, 3).await;
        assert!(outcome.answer.contains("snippet a"));
        assert_eq!(outcome.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn verify_parses_true_verdict() {
        let client = FixedSearchClient { results: vec![result("a", "evidence")], fail: false };
        let provider = ScriptedProvider {
            responses: Mutex::new(vec!["Verdict: true\n**Confidence**: Medium".to_string()]),
            fail: false,
        };
        let agent = KnowledgeAgent::new(&client, &provider, "test-model");
        let outcome = agent.verify("rust has a borrow checker", None).await;
        assert_eq!(outcome.verdict, Verdict::True);
        assert_eq!(outcome.confidence, Confidence::Medium);
    }
}
