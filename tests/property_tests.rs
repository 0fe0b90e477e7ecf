//! Property-based tests for relay routing and chunk assembly.

use ferry_core::events::{JoinRequest, UploadChunk, UploadEnd, UploadStart};
use ferry_core::{ClientEvent, ConnectionId, Outbound, RelayConfig, RelayEngine, ServerEvent};
use ferry_files::UploadStore;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Records every emitted event with its target (`None` = everyone)
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(Option<ConnectionId>, ServerEvent)>>,
}

impl Recorder {
    fn take(&self) -> Vec<(Option<ConnectionId>, ServerEvent)> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl Outbound for Recorder {
    fn emit_to(&self, connection: ConnectionId, event: ServerEvent) {
        self.events.lock().unwrap().push((Some(connection), event));
    }

    fn emit_to_all(&self, event: ServerEvent) {
        self.events.lock().unwrap().push((None, event));
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn engine() -> (TempDir, Arc<Recorder>, RelayEngine<Arc<Recorder>>) {
    let dir = TempDir::new().unwrap();
    let store = UploadStore::open(dir.path(), "/uploads").await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let engine = RelayEngine::new(store, Arc::clone(&recorder), RelayConfig::default());
    (dir, recorder, engine)
}

fn join(user: &str) -> ClientEvent {
    ClientEvent::Join(JoinRequest {
        user_id: user.to_string(),
        username: format!("name-{user}"),
    })
}

fn start(id: &str) -> ClientEvent {
    ClientEvent::UploadStart(UploadStart {
        file_name: "f.bin".to_string(),
        size: 0,
        file_id: id.to_string(),
    })
}

fn end(id: &str, recipient: Option<&str>) -> ClientEvent {
    ClientEvent::UploadEnd(UploadEnd {
        file_id: id.to_string(),
        file_name: "f.bin".to_string(),
        is_private: recipient.is_some(),
        recipient_id: recipient.map(str::to_string),
        sender_id: "sender".to_string(),
        sender_name: "Sender".to_string(),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The stored file is the in-order concatenation of every chunk
    #[test]
    fn stored_file_is_chunk_concatenation(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 0..16)
    ) {
        let rt = runtime();
        let (dir, recorder, engine) = rt.block_on(engine());
        let sender = ConnectionId::new(1);

        rt.block_on(async {
            engine.handle(sender, join("sender")).await;
            engine.handle(sender, start("t")).await;
            let mut offset = 0u64;
            for chunk in &chunks {
                engine.handle(sender, ClientEvent::UploadChunk(UploadChunk {
                    file_id: "t".to_string(),
                    file_name: String::new(),
                    chunk: chunk.clone(),
                    offset,
                })).await;
                offset += chunk.len() as u64;
            }
            engine.handle(sender, end("t", None)).await;
        });

        let expected: Vec<u8> = chunks.concat();
        let stored = std::fs::read(dir.path().join("t-f.bin")).unwrap();
        prop_assert_eq!(stored, expected);

        let shared = recorder
            .take()
            .into_iter()
            .filter(|(_, event)| matches!(event, ServerEvent::FileShared(_)))
            .count();
        prop_assert_eq!(shared, 1);
        prop_assert_eq!(engine.active_transfers(), 0);
    }

    /// A private send reaches exactly its recipient when online, and nobody
    /// otherwise
    #[test]
    fn private_send_reaches_at_most_the_recipient(
        online in prop::collection::btree_set(0u8..6, 0..6),
        recipient in 0u8..8,
    ) {
        let rt = runtime();
        let (_dir, recorder, engine) = rt.block_on(engine());
        let sender = ConnectionId::new(100);
        let connection_of = |user: u8| ConnectionId::new(u64::from(user) + 1);
        let recipient_id = format!("u{recipient}");

        rt.block_on(async {
            engine.handle(sender, join("sender")).await;
            for user in &online {
                engine.handle(connection_of(*user), join(&format!("u{user}"))).await;
            }
            engine.handle(sender, start("t")).await;
            recorder.take();
            engine.handle(sender, end("t", Some(&recipient_id))).await;
        });

        let events = recorder.take();
        let shared: Vec<_> = events
            .iter()
            .filter(|(_, event)| matches!(event, ServerEvent::FileShared(_)))
            .collect();
        let sent: Vec<_> = events
            .iter()
            .filter(|(_, event)| matches!(event, ServerEvent::FileSent(_)))
            .collect();

        if online.contains(&recipient) {
            prop_assert_eq!(shared.len(), 1);
            prop_assert_eq!(shared[0].0, Some(connection_of(recipient)));
            prop_assert_eq!(sent.len(), 1);
            prop_assert_eq!(sent[0].0, Some(sender));
        } else {
            prop_assert!(shared.is_empty());
            prop_assert!(sent.is_empty());
            let errors: Vec<_> = events
                .iter()
                .filter(|(_, event)| matches!(event, ServerEvent::UploadError(_)))
                .collect();
            prop_assert_eq!(errors.len(), 1);
            prop_assert_eq!(errors[0].0, Some(sender));
        }
    }
}
