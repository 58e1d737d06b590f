use std::time::Duration;

use rdb_metadata::{stack_address_symbol, MethodInfo, TypeTag};
use rdb_stack::{ResolveError, ResolveOptions, SessionEvent};
use rdb_wire::mock::{MockTargetConfig, MockTargetServer, ReplyAction, ReplyOverride};
use rdb_wire::{CommandFailure, CommandKind};
use tokio_util::sync::CancellationToken;

use super::{drain, run_method_memory, single_frame, var, Harness, CLASS, TABLE};

async fn wait_for_commands(target: &MockTargetServer, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while target.received_commands().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("target never received the expected commands");
}

#[tokio::test]
async fn cancelled_frame_leaves_late_reply_to_other_listeners() {
    let mut memory = run_method_memory();
    memory
        .write(TABLE, 0x4000i64.to_be_bytes())
        .write(0x4000, 42i32.to_be_bytes());
    let harness = Harness::run_method(
        MockTargetConfig {
            memory,
            overrides: vec![ReplyOverride {
                address: 0x4000,
                action: ReplyAction::Delay(Duration::from_millis(200)),
            }],
        },
        vec![var("count", TypeTag::Int32, 0)],
    )
    .await;
    let mut observer = harness.session.subscribe();
    let queue = harness.session.queue();
    let mut bystander = queue.register_listener();

    let cancel = CancellationToken::new();
    let session = harness.session.clone();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            session
                .resolve_frame_with_cancel(&single_frame(), 0, cancel)
                .await
        }
    });

    wait_for_commands(&harness.target, 6).await;
    cancel.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, ResolveError::Cancelled);

    assert_eq!(queue.pending_count(), 1);
    assert_eq!(queue.listener_count(), 1);
    assert_eq!(
        drain(&mut observer),
        [SessionEvent::Failed {
            frame: 0,
            error: ResolveError::Cancelled,
        }]
    );

    // The delayed reply still reaches the remaining listener.
    let late = harness.target.received_commands().await[5].request_id;
    let command = bystander
        .wait_for(late, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(
        command.kind(),
        &CommandKind::ReadMemory {
            address: 0x4000,
            length: 4,
        }
    );
    assert_eq!(command.bytes().unwrap(), 42i32.to_be_bytes());
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(harness.target.replies_sent(), 6);

    // Once nobody listens, a reply is dropped and the connection stays usable.
    drop(bystander);
    assert_eq!(queue.read_string(0x2000).await.unwrap(), "run");
    assert!(drain(&mut observer).is_empty());
}

#[tokio::test]
async fn unanswered_command_times_out() {
    let harness = Harness::start(
        MockTargetConfig {
            memory: run_method_memory(),
            overrides: vec![ReplyOverride {
                address: 0x1018,
                action: ReplyAction::Drop,
            }],
        },
        vec![MethodInfo::new("run", "()V", Vec::new()).unwrap()],
        vec![(stack_address_symbol(CLASS, "run", "()V"), TABLE)],
        ResolveOptions {
            reply_timeout: Some(Duration::from_millis(100)),
            ..ResolveOptions::default()
        },
    )
    .await;

    let err = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap_err();

    let received = harness.target.received_commands().await;
    assert_eq!(received.len(), 2);
    assert_eq!(
        err,
        ResolveError::TransportTimeout {
            request_id: received[1].request_id,
        }
    );
    assert_eq!(harness.session.queue().pending_count(), 0);
}

#[tokio::test]
async fn connection_loss_fails_the_frame() {
    let harness = Harness::run_method(
        MockTargetConfig {
            memory: run_method_memory(),
            overrides: vec![ReplyOverride {
                address: 0x1010,
                action: ReplyAction::Drop,
            }],
        },
        Vec::new(),
    )
    .await;

    let session = harness.session.clone();
    let task = tokio::spawn(async move { session.resolve_top_frame(&single_frame()).await });

    wait_for_commands(&harness.target, 1).await;
    harness.target.shutdown();

    let err = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(
        err,
        ResolveError::MemoryRead {
            address: 0x1010,
            failure: CommandFailure::ConnectionClosed,
        }
    );
    assert!(!harness.session.queue().is_connected());
}
