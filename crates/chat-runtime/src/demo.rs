//! Deterministic offline engines.

use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chat_events::{EngineItem, EngineSinks};
use chat_protocol::ThinkingStage;
use serde_json::json;
use tracing::debug;

use crate::engine::{EngineRequest, ReasoningEngine};
use crate::toolkit::Toolkit;

/// Canned assistant that reasons briefly, shows a table when asked for one,
/// and streams a markdown answer word by word.
#[derive(Debug, Clone, Default)]
pub struct DemoEngine {
    toolkit: Toolkit,
    fragment_delay: Option<Duration>,
}

impl DemoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between answer fragments, to make streaming visible.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    fn wants_table(input: &str) -> bool {
        let lower = input.to_lowercase();
        ["table", "data", "sales"]
            .iter()
            .any(|keyword| lower.contains(keyword))
    }

    fn compose_answer(request: &EngineRequest, showed_table: bool) -> String {
        let mut answer = format!("You said: **{}**\n\n", request.input.trim());
        if !request.history.is_empty() {
            answer.push_str(&format!(
                "This conversation has {} earlier message(s).\n\n",
                request.history.len()
            ));
        }
        if !request.files.is_empty() {
            let names: Vec<&str> = request
                .files
                .iter()
                .map(|file| file.filename.as_str())
                .collect();
            answer.push_str(&format!("Attached: {}.\n\n", names.join(", ")));
        }
        if showed_table {
            answer.push_str("The table above summarizes quarterly sales by product.");
        } else {
            answer.push_str("Ask for a table to see structured data.");
        }
        answer
    }
}

#[async_trait]
impl ReasoningEngine for DemoEngine {
    fn name(&self) -> &str {
        "demo"
    }

    async fn run(&self, request: EngineRequest, sinks: EngineSinks) -> Result<()> {
        let EngineSinks { tokens, tools } = sinks;
        tokens
            .thinking("Reading the request. ", Some(ThinkingStage::Analyzing))
            .await?;

        let showed_table = Self::wants_table(&request.input);
        if showed_table {
            tokens
                .thinking("A table will make this clearer. ", Some(ThinkingStage::Planning))
                .await?;
            self.toolkit
                .display_table(
                    &tools,
                    "Quarterly sales",
                    vec!["product".into(), "quarter".into(), "units".into()],
                    vec![
                        vec![json!("Widget"), json!("Q1"), json!(120)],
                        vec![json!("Widget"), json!("Q2"), json!(180)],
                        vec![json!("Gadget"), json!("Q1"), json!(75)],
                    ],
                )
                .await?;
        }

        let answer = Self::compose_answer(&request, showed_table);
        for word in answer.split_inclusive(' ') {
            tokens.content(word, false).await?;
            if let Some(delay) = self.fragment_delay {
                tokio::time::sleep(delay).await;
            }
        }
        debug!(chars = answer.len(), "demo answer streamed");
        Ok(())
    }
}

/// Replays a fixed script. Text items go to the token sink, everything else
/// to the tool sink.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Vec<EngineItem>,
    failure: Option<String>,
    hold: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<EngineItem>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Fail with `message` once the script has been sent.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Wait this long after the script before returning.
    pub fn holding_for(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, _request: EngineRequest, sinks: EngineSinks) -> Result<()> {
        for item in self.script.iter().cloned() {
            match item {
                EngineItem::Thinking { .. } | EngineItem::Content { .. } => {
                    sinks.tokens.send(item).await?
                }
                _ => sinks.tools.send(item).await?,
            }
        }
        if let Some(hold) = self.hold {
            tokio::time::sleep(hold).await;
        }
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chat_events::EventMux;
    use chat_protocol::{DataType, SessionId};

    use super::*;
    use crate::engine::HistoryEntry;

    fn request(input: &str) -> EngineRequest {
        EngineRequest {
            session_id: SessionId::from_string("s"),
            input: input.into(),
            history: Vec::new(),
            files: Vec::new(),
        }
    }

    async fn collect(engine: &dyn ReasoningEngine, request: EngineRequest) -> Result<Vec<EngineItem>> {
        let mux = EventMux::new(64);
        let sinks = mux.sinks();
        let mut rx = mux.into_receiver();
        engine.run(request, sinks).await?;
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        Ok(items)
    }

    fn answer_text(items: &[EngineItem]) -> String {
        items
            .iter()
            .filter_map(|item| match item {
                EngineItem::Content { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn demo_engine_shows_table_when_asked() -> Result<()> {
        let items = collect(&DemoEngine::new(), request("show me a sales table")).await?;
        assert!(items.iter().any(|item| matches!(
            item,
            EngineItem::Data { data_type: DataType::Dataframe, .. }
        )));
        assert!(answer_text(&items).starts_with("You said: **show me a sales table**"));
        Ok(())
    }

    #[tokio::test]
    async fn demo_engine_mentions_history_without_table() -> Result<()> {
        let mut request = request("hello");
        request.history = vec![HistoryEntry {
            role: chat_protocol::MessageRole::User,
            content: "earlier".into(),
        }];
        let items = collect(&DemoEngine::new(), request).await?;
        assert!(!items.iter().any(|item| matches!(item, EngineItem::ToolStart { .. })));
        assert!(answer_text(&items).contains("1 earlier message(s)"));
        Ok(())
    }

    #[tokio::test]
    async fn scripted_engine_replays_then_fails() {
        let engine = ScriptedEngine::new(vec![EngineItem::Content {
            content: "x".into(),
            format: chat_protocol::ContentFormat::Markdown,
            is_complete: false,
        }])
        .failing_with("model unavailable");
        let error = collect(&engine, request("q")).await.unwrap_err();
        assert_eq!(error.to_string(), "model unavailable");
    }
}
