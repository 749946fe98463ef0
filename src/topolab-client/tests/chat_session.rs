use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use topolab_client::{
    ByteStream, ChatBackend, ChatMode, ChatResponse, ChatSession, ClientError, Message,
    MessageStatus, Model, Result, Role, SendRequest, SessionRef, SessionSummary,
};

#[derive(Debug, Clone, PartialEq)]
struct SentMessage {
    topology_id: String,
    session: SessionRef,
    mode: ChatMode,
    request: SendRequest,
}

#[derive(Default)]
struct MockChat {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    sent: Mutex<Vec<SentMessage>>,
    stops: Mutex<Vec<String>>,
    fail_stop: bool,
}

impl MockChat {
    fn with_response(session_id: Option<&str>, body: ByteStream) -> Self {
        let mock = Self::default();
        mock.push(session_id, body);
        mock
    }

    fn push(&self, session_id: Option<&str>, body: ByteStream) {
        self.responses.lock().push_back(Ok(ChatResponse {
            session_id: session_id.map(str::to_string),
            body,
        }));
    }

    fn push_error(&self, error: ClientError) {
        self.responses.lock().push_back(Err(error));
    }
}

#[async_trait]
impl ChatBackend for MockChat {
    async fn send_message(
        &self,
        topology_id: &str,
        session: &SessionRef,
        mode: ChatMode,
        request: &SendRequest,
    ) -> Result<ChatResponse> {
        self.sent.lock().push(SentMessage {
            topology_id: topology_id.to_string(),
            session: session.clone(),
            mode,
            request: request.clone(),
        });
        self.responses
            .lock()
            .pop_front()
            .expect("unexpected send_message call")
    }

    async fn stop_agent(&self, _topology_id: &str, session_id: &str) -> Result<()> {
        self.stops.lock().push(session_id.to_string());
        if self.fail_stop {
            return Err(ClientError::Server {
                status: 404,
                message: "No active agent task found for this session".to_string(),
            });
        }
        Ok(())
    }
}

fn body(chunks: &[&'static [u8]]) -> ByteStream {
    let items: Vec<Result<Bytes>> = chunks
        .iter()
        .map(|chunk| Ok(Bytes::from_static(chunk)))
        .collect();
    futures::stream::iter(items).boxed()
}

fn last_content(chat: &ChatSession<MockChat>) -> String {
    chat.messages()
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_streamed_reply_builds_assistant_message() {
    let backend = MockChat::with_response(
        Some("s-1"),
        body(&[
            b"data: {\"te",
            b"xt\":\"Hel\"}\n",
            b"data: {\"text\":\"lo\"}\n",
        ]),
    );
    let chat = ChatSession::new(backend, "topo-1");

    let resolved = chat.send("hi").await.unwrap();

    assert_eq!(resolved, SessionRef::Existing("s-1".to_string()));
    let messages = chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[0].status, MessageStatus::Confirmed);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello");
    assert!(!chat.is_streaming());
    assert_eq!(chat.error(), None);

    let sent = chat.backend().sent.lock().clone();
    assert_eq!(
        sent,
        vec![SentMessage {
            topology_id: "topo-1".to_string(),
            session: SessionRef::New,
            mode: ChatMode::Agent,
            request: SendRequest {
                content: "hi".to_string(),
                model: Model::Qwen,
            },
        }]
    );
}

#[tokio::test]
async fn test_new_session_is_adopted_and_locked() {
    let backend = MockChat::with_response(Some("s-9"), body(&[b"data: {\"text\":\"ok\"}\n"]));
    let chat = ChatSession::new(backend, "topo-1");
    chat.set_model(Model::Gemma);
    chat.set_mode(ChatMode::Ask);

    chat.send("first").await.unwrap();

    let session = chat.session();
    assert_eq!(session.id, SessionRef::Existing("s-9".to_string()));
    assert!(session.started);
    assert_eq!(session.model, Model::Gemma);
    assert_eq!(session.mode, ChatMode::Ask);

    chat.set_model(Model::Deepseek);
    chat.set_mode(ChatMode::Agent);
    let session = chat.session();
    assert_eq!(session.model, Model::Gemma);
    assert_eq!(session.mode, ChatMode::Ask);
}

#[tokio::test]
async fn test_follow_up_targets_adopted_session() {
    let backend = MockChat::with_response(Some("s-2"), body(&[b"data: {\"text\":\"a\"}\n"]));
    backend.push(None, body(&[b"data: {\"text\":\"b\"}\n"]));
    let chat = ChatSession::new(backend, "topo-1");

    chat.send("one").await.unwrap();
    let resolved = chat.send("two").await.unwrap();

    assert_eq!(resolved, SessionRef::Existing("s-2".to_string()));
    let sent = chat.backend().sent.lock().clone();
    assert_eq!(sent[1].session, SessionRef::Existing("s-2".to_string()));

    let roles: Vec<Role> = chat.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(last_content(&chat), "b");
}

#[tokio::test]
async fn test_missing_session_header_keeps_placeholder() {
    let backend = MockChat::with_response(None, body(&[b"data: {\"text\":\"a\"}\n"]));
    let chat = ChatSession::new(backend, "topo-1");

    let resolved = chat.send("hi").await.unwrap();

    assert_eq!(resolved, SessionRef::New);
    assert!(!chat.session().started);
}

#[tokio::test]
async fn test_error_record_stops_text_application() {
    let backend = MockChat::with_response(
        Some("s-1"),
        body(&[
            b"data: {\"text\":\"partial\"}\n",
            b"data: {\"error\":\"LLM Server Error: 502\"}\ndata: {\"text\":\" ignored\"}\n",
            b"data: {\"text\":\" also ignored\"}\n",
        ]),
    );
    let chat = ChatSession::new(backend, "topo-1");

    let resolved = chat.send("hi").await.unwrap();

    assert_eq!(resolved, SessionRef::Existing("s-1".to_string()));
    assert_eq!(last_content(&chat), "partial");
    assert_eq!(chat.error().as_deref(), Some("LLM Server Error: 502"));
    assert!(!chat.is_streaming());
}

#[tokio::test]
async fn test_malformed_record_is_skipped() {
    let backend = MockChat::with_response(
        Some("s-1"),
        body(&[b"data: {oops\ndata: {\"text\":\"fine\"}\n"]),
    );
    let chat = ChatSession::new(backend, "topo-1");

    chat.send("hi").await.unwrap();

    assert_eq!(last_content(&chat), "fine");
    assert_eq!(chat.error(), None);
}

#[tokio::test]
async fn test_send_failure_keeps_pending_user_message() {
    let backend = MockChat::default();
    backend.push_error(ClientError::ConnectionFailed {
        message: "connection refused".to_string(),
    });
    let chat = ChatSession::new(backend, "topo-1");

    let err = chat.send("hello?").await.unwrap_err();

    assert!(err.is_network_error());
    let messages = chat.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert!(messages[0].is_pending());
    assert!(!chat.is_streaming());
    assert!(chat.error().unwrap().contains("connection refused"));
    assert!(!chat.session().started);
}

#[tokio::test]
async fn test_transport_error_mid_stream() {
    let items: Vec<Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"data: {\"text\":\"so far\"}\n")),
        Err(ClientError::ConnectionFailed {
            message: "reset by peer".to_string(),
        }),
        Ok(Bytes::from_static(b"data: {\"text\":\"never\"}\n")),
    ];
    let backend = MockChat::with_response(Some("s-1"), futures::stream::iter(items).boxed());
    let chat = ChatSession::new(backend, "topo-1");

    let err = chat.send("hi").await.unwrap_err();

    assert!(matches!(err, ClientError::ConnectionFailed { .. }));
    assert_eq!(last_content(&chat), "so far");
    assert!(!chat.is_streaming());
    assert!(chat.error().is_some());
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let chat = ChatSession::new(MockChat::default(), "topo-1");

    assert!(matches!(
        chat.send("   ").await,
        Err(ClientError::EmptyMessage)
    ));
    assert!(chat.messages().is_empty());
    assert!(chat.backend().sent.lock().is_empty());
}

#[tokio::test]
async fn test_stop_is_noop_outside_agent_mode() {
    let backend = MockChat::with_response(Some("s-1"), body(&[b"data: {\"text\":\"a\"}\n"]));
    let chat = ChatSession::new(backend, "topo-1");
    chat.set_mode(ChatMode::Ask);
    chat.send("hi").await.unwrap();

    chat.stop().await.unwrap();

    assert!(chat.backend().stops.lock().is_empty());
}

#[tokio::test]
async fn test_stop_is_noop_without_session() {
    let chat = ChatSession::new(MockChat::default(), "topo-1");

    chat.stop().await.unwrap();

    assert!(chat.backend().stops.lock().is_empty());
}

#[tokio::test]
async fn test_stop_failure_is_reported() {
    let backend = MockChat {
        fail_stop: true,
        ..MockChat::default()
    };
    backend.push(Some("s-1"), body(&[b"data: {\"text\":\"a\"}\n"]));
    let chat = ChatSession::new(backend, "topo-1");
    chat.send("hi").await.unwrap();

    let err = chat.stop().await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(chat.backend().stops.lock().clone(), vec!["s-1".to_string()]);
    assert!(chat.error().is_some());
}

#[tokio::test]
async fn test_stop_while_streaming_clears_flag_immediately() {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
    let backend = MockChat::with_response(Some("s-7"), rx.boxed());
    let chat = ChatSession::new(backend, "topo-1");

    let driver = async {
        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"text\":\"a\"}\n")))
            .unwrap();
        for _ in 0..100 {
            if last_content(&chat) == "a" {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(last_content(&chat), "a");
        assert!(chat.is_streaming());

        chat.stop().await.unwrap();
        assert!(!chat.is_streaming());

        // The backend may still deliver output after the stop.
        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"text\":\"b\"}\n")))
            .unwrap();
        drop(tx);
    };

    let (result, ()) = tokio::join!(chat.send("run diagnostics"), driver);

    assert_eq!(result.unwrap(), SessionRef::Existing("s-7".to_string()));
    assert_eq!(chat.backend().stops.lock().clone(), vec!["s-7".to_string()]);
    assert_eq!(last_content(&chat), "ab");
    assert!(!chat.is_streaming());
}

fn contents(chat: &ChatSession<MockChat>) -> Vec<String> {
    chat.messages().into_iter().map(|m| m.content).collect()
}

async fn settle(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

fn record(text: &'static str) -> Result<Bytes> {
    Ok(Bytes::from(format!("data: {{\"text\":\"{text}\"}}\n")))
}

#[tokio::test]
async fn test_stopped_stream_does_not_leak_into_next_reply() {
    let (first_tx, first_rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
    let (second_tx, second_rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
    let backend = MockChat::with_response(Some("s-1"), first_rx.boxed());
    backend.push(None, second_rx.boxed());
    let chat = ChatSession::new(backend, "topo-1");

    let driver = async {
        first_tx.unbounded_send(record("A")).unwrap();
        settle(|| contents(&chat) == ["first", "A"]).await;
        chat.stop().await.unwrap();
        assert!(!chat.is_streaming());

        let overlap = async {
            settle(|| chat.messages().len() == 4).await;
            assert!(chat.is_streaming());

            // The stopped stream keeps talking, then ends.
            first_tx.unbounded_send(record("late")).unwrap();
            first_tx.close_channel();
            settle(|| contents(&chat)[1] == "Alate").await;
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert!(chat.is_streaming());

            second_tx.unbounded_send(record("B")).unwrap();
            second_tx.close_channel();
        };

        let (second, ()) = tokio::join!(chat.send("second"), overlap);
        assert_eq!(second.unwrap(), SessionRef::Existing("s-1".to_string()));
    };

    let (first, ()) = tokio::join!(chat.send("first"), driver);

    assert_eq!(first.unwrap(), SessionRef::Existing("s-1".to_string()));
    assert_eq!(contents(&chat), vec!["first", "Alate", "second", "B"]);
    let roles: Vec<Role> = chat.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert!(!chat.is_streaming());
    assert_eq!(chat.error(), None);
}

#[tokio::test]
async fn test_reset_detaches_running_stream() {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes>>();
    let backend = MockChat::with_response(Some("s-3"), rx.boxed());
    let chat = ChatSession::new(backend, "topo-1");

    let driver = async {
        tx.unbounded_send(record("old")).unwrap();
        settle(|| contents(&chat) == ["hi", "old"]).await;

        chat.reset();
        tx.unbounded_send(record(" reply")).unwrap();
        tx.close_channel();
    };

    let (result, ()) = tokio::join!(chat.send("hi"), driver);

    assert!(result.is_ok());
    assert!(chat.messages().is_empty());
    assert!(!chat.is_streaming());
    assert_eq!(chat.session().id, SessionRef::New);
}

#[tokio::test]
async fn test_resume_and_reset() {
    let chat = ChatSession::new(MockChat::default(), "topo-1");
    let summary = SessionSummary {
        id: "42".to_string(),
        title: Some("R1 OSPF".to_string()),
        model: Some("deepseek".to_string()),
        mode: Some("agent".to_string()),
    };
    let history = vec![Message::pending_user("earlier question")];

    chat.resume(&summary, history);

    let session = chat.session();
    assert_eq!(session.id, SessionRef::Existing("42".to_string()));
    assert_eq!(session.model, Model::Deepseek);
    assert_eq!(session.mode, ChatMode::Agent);
    assert!(session.started);
    assert_eq!(chat.messages().len(), 1);

    chat.set_model(Model::Qwen);
    assert_eq!(chat.session().model, Model::Deepseek);

    chat.reset();

    let session = chat.session();
    assert_eq!(session.id, SessionRef::New);
    assert!(!session.started);
    assert_eq!(session.model, Model::Deepseek);
    assert!(chat.messages().is_empty());
}
