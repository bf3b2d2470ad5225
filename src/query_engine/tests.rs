use super::*;
use crate::agent::ToolHandler;
use crate::conversation::{ConversationBackend, InMemoryBackend};
use crate::llm::{ChatCompletion, ToolDefinition};
use crate::testing::{ScriptedChat, calls_tools, tool_call};
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

/// Echoes `text` after `delay_ms`, recording completion order; fails when `fail` is set
#[derive(Default)]
struct EchoTool {
    completed: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function("echo", "Echo text back", json!({"type": "object"}))
    }

    async fn handle(&self, _user_id: &str, arguments: &serde_json::Value) -> anyhow::Result<String> {
        let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
        let text = arguments["text"].as_str().unwrap_or_default().to_string();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.completed
            .lock()
            .expect("lock should not be poisoned")
            .push(text.clone());
        if arguments["fail"].as_bool().unwrap_or(false) {
            return Err(anyhow!("echo exploded"));
        }
        Ok(text)
    }
}

struct Fixture {
    engine: QueryEngine,
    chat: Arc<ScriptedChat>,
    echo: Arc<EchoTool>,
    backend: Arc<InMemoryBackend>,
}

fn fixture(replies: Vec<Result<ChatCompletion, LlmError>>) -> Fixture {
    let chat = Arc::new(ScriptedChat::new(replies));
    let echo = Arc::new(EchoTool::default());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::clone(&echo) as Arc<dyn ToolHandler>);
    let backend = Arc::new(InMemoryBackend::new());
    let store = ConversationStore::new(
        Arc::clone(&backend) as Arc<dyn ConversationBackend>,
        50,
        Duration::from_secs(60),
    );
    let engine = QueryEngine::new(
        Arc::clone(&chat) as Arc<dyn ChatProvider>,
        Arc::new(registry),
        Arc::new(store),
    );
    Fixture {
        engine,
        chat,
        echo,
        backend,
    }
}

fn roles(messages: &[ConversationMessage]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}

#[tokio::test]
async fn direct_answer_without_tools() {
    let fx = fixture(vec![Ok(ChatCompletion::text("Hello!"))]);

    let answer = fx.engine.chat("hi", "alice").await.expect("should answer");

    assert_eq!(answer, "Hello!");
    let requests = fx.chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tool_names, vec!["echo".to_string()]);
    assert_eq!(requests[0].max_tokens, Some(2500));
    assert_eq!(requests[0].messages[0].content, SYSTEM_PROMPT);
    assert_eq!(roles(&requests[0].messages), vec![Role::System, Role::User]);

    let stored = fx.engine.conversations().get_history("alice").await;
    assert_eq!(roles(&stored), vec![Role::User, Role::Assistant]);
    assert_eq!(stored[1].content, "Hello!");
}

#[tokio::test]
async fn tool_results_follow_request_order_not_completion_order() {
    let fx = fixture(vec![
        Ok(calls_tools(vec![
            tool_call("call_slow", "echo", r#"{"text":"slow","delay_ms":80}"#),
            tool_call("call_fast", "echo", r#"{"text":"fast","delay_ms":1}"#),
        ])),
        Ok(ChatCompletion::text("combined answer")),
    ]);

    let answer = fx.engine.chat("do both", "bob").await.expect("should answer");

    assert_eq!(answer, "combined answer");
    assert_eq!(
        *fx.echo.completed.lock().expect("lock should not be poisoned"),
        vec!["fast".to_string(), "slow".to_string()]
    );

    let requests = fx.chat.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].tool_names.is_empty());

    let stored = fx.engine.conversations().get_history("bob").await;
    assert_eq!(
        roles(&stored),
        vec![
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );
    assert_eq!(stored[1].content, "function called echo");
    assert_eq!(stored[2].tool_call_id.as_deref(), Some("call_slow"));
    assert_eq!(stored[2].content, "slow");
    assert_eq!(stored[4].tool_call_id.as_deref(), Some("call_fast"));
    assert_eq!(stored[4].content, "fast");
    assert_eq!(stored[5].content, "combined answer");
    assert_eq!(&stored[..5], &requests[1].messages[1..]);
}

#[tokio::test]
async fn failing_tool_does_not_cancel_siblings() {
    let fx = fixture(vec![
        Ok(calls_tools(vec![
            tool_call("call_bad", "echo", r#"{"text":"bad","fail":true}"#),
            tool_call("call_good", "echo", r#"{"text":"good","delay_ms":20}"#),
            tool_call("call_unknown", "weather", "{}"),
        ])),
        Ok(ChatCompletion::text("partial answer")),
    ]);

    let answer = fx.engine.chat("try", "carol").await.expect("should answer");

    assert_eq!(answer, "partial answer");
    let stored = fx.engine.conversations().get_history("carol").await;
    let results: Vec<(&str, &str)> = stored
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| {
            (
                m.tool_call_id.as_deref().unwrap_or_default(),
                m.content.as_str(),
            )
        })
        .collect();
    assert_eq!(
        results,
        vec![
            ("call_bad", r#"{"error":"Error in echo: echo exploded"}"#),
            ("call_good", "good"),
            ("call_unknown", r#"{"error":"Unknown tool: weather"}"#),
        ]
    );
}

#[tokio::test]
async fn existing_history_is_sent_and_only_new_messages_persisted() {
    let fx = fixture(vec![
        Ok(ChatCompletion::text("first answer")),
        Ok(ChatCompletion::text("second answer")),
    ]);

    fx.engine.chat("first", "dave").await.expect("should answer");
    fx.engine.chat("second", "dave").await.expect("should answer");

    let second_request = &fx.chat.requests()[1];
    let contents: Vec<&str> = second_request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        contents,
        vec![SYSTEM_PROMPT, "first", "first answer", "second"]
    );

    let stored = fx.engine.conversations().get_history("dave").await;
    assert_eq!(stored.len(), 4);
}

#[tokio::test]
async fn stored_system_message_is_not_duplicated() {
    let fx = fixture(vec![Ok(ChatCompletion::text("ok"))]);
    fx.engine
        .conversations()
        .append_one("erin", &ConversationMessage::system("custom prompt"))
        .await;

    fx.engine.chat("hi", "erin").await.expect("should answer");

    let messages = &fx.chat.requests()[0].messages;
    assert_eq!(roles(messages), vec![Role::System, Role::User]);
    assert_eq!(messages[0].content, "custom prompt");
}

#[tokio::test]
async fn rate_limit_is_classified_and_nothing_persisted() {
    let fx = fixture(vec![Err(LlmError::RateLimited("slow down".to_string()))]);

    let failure = fx.engine.chat("hi", "frank").await.expect_err("should fail");

    assert_eq!(failure, ChatFailure::RateLimit);
    assert_eq!(
        failure.to_string(),
        "Rate limit exceeded. Please try again later."
    );
    assert!(fx.engine.conversations().get_history("frank").await.is_empty());
}

#[tokio::test]
async fn follow_up_failure_is_terminal() {
    let fx = fixture(vec![
        Ok(calls_tools(vec![tool_call("call_1", "echo", r#"{"text":"x"}"#)])),
        Err(LlmError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        }),
    ]);

    let failure = fx.engine.chat("hi", "gina").await.expect_err("should fail");

    assert_eq!(failure, ChatFailure::Api);
    assert!(fx.engine.conversations().get_history("gina").await.is_empty());
}

#[tokio::test]
async fn leading_orphaned_tool_results_are_dropped() {
    let fx = fixture(vec![Ok(ChatCompletion::text("ok"))]);
    let key = ConversationStore::key_for("hank");
    let orphan = serde_json::to_string(&ConversationMessage::tool_result("gone", "stale"))
        .expect("can serialize json");
    let earlier = serde_json::to_string(&ConversationMessage::assistant("earlier"))
        .expect("can serialize json");
    fx.backend
        .append_bounded(&key, &[orphan, earlier], 50, Duration::from_secs(60))
        .await
        .expect("should seed history");

    fx.engine.chat("hi", "hank").await.expect("should answer");

    let messages = &fx.chat.requests()[0].messages;
    assert_eq!(
        roles(messages),
        vec![Role::System, Role::Assistant, Role::User]
    );
}

#[tokio::test]
async fn clear_history_forgets_conversation() {
    let fx = fixture(vec![Ok(ChatCompletion::text("ok"))]);
    fx.engine.chat("hi", "ivy").await.expect("should answer");

    fx.engine.clear_history("ivy").await;

    assert!(fx.engine.conversations().get_history("ivy").await.is_empty());
}

#[test]
fn orphan_filter_keeps_interior_tool_messages() {
    let call = tool_call("c", "echo", "{}");
    let history = vec![
        ConversationMessage::tool_result("x", "orphan"),
        ConversationMessage::tool_announcement(&call),
        ConversationMessage::tool_result("c", "kept"),
    ];

    let cleaned = drop_orphaned_tool_results(history);

    assert_eq!(roles(&cleaned), vec![Role::Assistant, Role::Tool]);
}
