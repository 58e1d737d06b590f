use rdb_metadata::{stack_address_symbol, MethodInfo, TypeTag};
use rdb_stack::{
    DecodeError, DecodedValue, ResolveError, ResolveOptions, SessionEvent, StackFrame,
    SuspendedStack,
};
use rdb_wire::mock::{MockTargetConfig, ReplyAction, ReplyOverride};
use rdb_wire::CommandKind;

use super::{config, drain, run_method_memory, single_frame, var, Harness, CLASS, METHOD, TABLE};

#[tokio::test]
async fn resolves_top_frame_int_variable() {
    let mut memory = run_method_memory();
    memory
        .write(TABLE, 0x4000i64.to_be_bytes())
        .write(0x4000, 42i32.to_be_bytes());
    let harness = Harness::run_method(config(memory), vec![var("count", TypeTag::Int32, 0)]).await;
    let mut observer = harness.session.subscribe();

    let frame = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap();

    assert_eq!(frame.frame_index, 0);
    assert_eq!(frame.method.name, "run");
    assert_eq!(frame.method.descriptor, "()V");
    assert_eq!(frame.values.len(), 1);
    assert_eq!(frame.values[0].value, Ok(DecodedValue::Int32(42)));

    let kinds: Vec<_> = harness
        .target
        .received_commands()
        .await
        .into_iter()
        .map(|c| c.kind)
        .collect();
    assert_eq!(
        kinds,
        [
            CommandKind::ReadMemory { address: 0x1010, length: 8 },
            CommandKind::ReadMemory { address: 0x1018, length: 8 },
            CommandKind::ReadString { address: 0x2000 },
            CommandKind::ReadString { address: 0x2100 },
            CommandKind::ReadMemory { address: TABLE, length: 8 },
            CommandKind::ReadMemory { address: 0x4000, length: 4 },
        ]
    );

    let events = drain(&mut observer);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        SessionEvent::Variable { frame: 0, value } if value.name() == "count"
    ));
    assert_eq!(events[1], SessionEvent::Done { frame: 0, emitted: 1 });
}

#[tokio::test]
async fn skips_slots_without_storage() {
    let mut memory = run_method_memory();
    memory
        .write(TABLE, [0u8; 8])
        .write(TABLE + 8, 0x5000i64.to_be_bytes())
        .write(0x5000, 7i64.to_be_bytes());
    let harness = Harness::run_method(
        config(memory),
        vec![
            var("unset", TypeTag::Int32, 0),
            var("total", TypeTag::Int64, 1),
        ],
    )
    .await;

    let frame = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap();

    assert_eq!(frame.values.len(), 1);
    assert_eq!(frame.values[0].name(), "total");
    assert_eq!(frame.values[0].value, Ok(DecodedValue::Int64(7)));
    // Nothing is ever read at the null slot address.
    assert!(harness
        .target
        .received_commands()
        .await
        .iter()
        .all(|c| c.kind.address() != 0));
}

#[tokio::test]
async fn empty_stack_fails_without_issuing_commands() {
    let harness = Harness::run_method(config(run_method_memory()), Vec::new()).await;
    let mut observer = harness.session.subscribe();

    let err = harness
        .session
        .resolve_top_frame(&SuspendedStack::default())
        .await
        .unwrap_err();

    assert_eq!(err, ResolveError::EmptyStack);
    assert_eq!(
        drain(&mut observer),
        [SessionEvent::Failed {
            frame: 0,
            error: ResolveError::EmptyStack,
        }]
    );
    assert!(harness.target.received_commands().await.is_empty());
}

#[tokio::test]
async fn short_value_read_is_a_decode_error() {
    let mut memory = run_method_memory();
    memory
        .write(TABLE, 0x4000i64.to_be_bytes())
        .write(0x4000, 1.0f64.to_be_bytes());
    let harness = Harness::run_method(
        MockTargetConfig {
            memory,
            overrides: vec![ReplyOverride {
                address: 0x4000,
                action: ReplyAction::Truncate(4),
            }],
        },
        vec![var("ratio", TypeTag::Float64, 0)],
    )
    .await;
    let mut observer = harness.session.subscribe();

    let frame = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap();

    assert_eq!(
        frame.values[0].value,
        Err(DecodeError::Truncated {
            type_tag: TypeTag::Float64,
            expected: 8,
            actual: 4,
        })
    );
    let events = drain(&mut observer);
    assert_eq!(events.last(), Some(&SessionEvent::Done { frame: 0, emitted: 1 }));
}

#[tokio::test]
async fn commands_are_issued_strictly_in_sequence() {
    let mut memory = run_method_memory();
    memory
        .write(TABLE, 0x4000i64.to_be_bytes())
        .write(TABLE + 8, 0x4008i64.to_be_bytes())
        .write(0x4000, [0u8; 16]);
    let harness = Harness::run_method(
        config(memory),
        vec![var("a", TypeTag::Int32, 0), var("b", TypeTag::Float32, 1)],
    )
    .await;

    harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap();

    let received = harness.target.received_commands().await;
    assert_eq!(received.len(), 8);
    for (i, command) in received.iter().enumerate() {
        assert_eq!(
            command.replies_sent_before, i,
            "command {i} was issued before the previous reply arrived"
        );
    }
    let ids: Vec<_> = received.iter().map(|c| c.request_id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn unknown_method_fails_before_address_reads() {
    let mut memory = run_method_memory();
    memory.write_c_string(0x2100, "(J)V");
    let harness = Harness::run_method(config(memory), vec![var("x", TypeTag::Int32, 0)]).await;
    let mut observer = harness.session.subscribe();

    let err = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ResolveError::MethodNotFound {
            class: CLASS.into(),
            name: "run".into(),
            descriptor: "(J)V".into(),
        }
    );
    assert_eq!(harness.target.received_commands().await.len(), 4);
    assert!(matches!(
        drain(&mut observer).as_slice(),
        [SessionEvent::Failed { frame: 0, error: ResolveError::MethodNotFound { .. } }]
    ));
}

#[tokio::test]
async fn missing_address_table_symbol_is_reported() {
    let harness = Harness::start(
        config(run_method_memory()),
        vec![
            MethodInfo::new("run", "()V", vec![var("x", TypeTag::Int32, 0)]).unwrap(),
        ],
        Vec::new(),
        ResolveOptions::default(),
    )
    .await;

    let err = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ResolveError::SymbolNotFound(stack_address_symbol(CLASS, "run", "()V"))
    );
}

#[tokio::test]
async fn rejected_identity_read_is_a_memory_error() {
    let harness = Harness::run_method(config(Default::default()), Vec::new()).await;

    let err = harness
        .session
        .resolve_top_frame(&single_frame())
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::MemoryRead { address: 0x1010, .. }));
}

#[tokio::test]
async fn out_of_range_frame_index_is_rejected() {
    let harness = Harness::run_method(config(run_method_memory()), Vec::new()).await;

    let err = harness
        .session
        .resolve_frame(&single_frame(), 3)
        .await
        .unwrap_err();
    assert_eq!(err, ResolveError::NoSuchFrame { index: 3, len: 1 });
}

#[tokio::test]
async fn removed_observers_see_no_further_events() {
    let mut memory = run_method_memory();
    memory.write(TABLE, [0u8; 8]);
    let harness = Harness::run_method(config(memory), vec![var("x", TypeTag::Int32, 0)]).await;

    let mut kept = harness.session.subscribe();
    let mut removed = harness.session.subscribe();
    assert!(harness.session.remove_observer(removed.id()));

    let stack = SuspendedStack::new(vec![StackFrame::new(CLASS, METHOD, 1)]);
    harness.session.resolve_top_frame(&stack).await.unwrap();

    assert_eq!(
        drain(&mut kept),
        [SessionEvent::Done { frame: 0, emitted: 0 }]
    );
    assert!(drain(&mut removed).is_empty());
}
