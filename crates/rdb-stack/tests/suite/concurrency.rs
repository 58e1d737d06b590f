use std::sync::Arc;

use rdb_metadata::{
    stack_address_symbol, ClassRegistry, ClazzInfo, MemoryClassSource, MethodInfo, SymbolResolver,
    TypeTag,
};
use rdb_stack::{
    DebugSession, DecodedValue, ResolveError, ResolveOptions, SessionEvent, StackFrame,
    SuspendedStack,
};
use rdb_wire::mock::{MockTargetServer, TargetMemory};
use rdb_wire::CommandQueue;

use super::{config, drain, method_record, run_method_memory, var, Harness, CLASS, METHOD, TABLE};

const HELPER: u64 = 0x1100;
const HELPER_TABLE: u64 = 0xa000;

fn two_method_memory() -> TargetMemory {
    let mut memory = run_method_memory();
    method_record(&mut memory, HELPER, 0x3000, "helper", "(I)I");
    memory
        .write(TABLE, 0x4000i64.to_be_bytes())
        .write(0x4000, 42i32.to_be_bytes())
        .write(HELPER_TABLE, 0x4100i64.to_be_bytes())
        .write(0x4100, (-5i32).to_be_bytes());
    memory
}

fn two_methods() -> Vec<MethodInfo> {
    vec![
        MethodInfo::new("run", "()V", vec![var("count", TypeTag::Int32, 0)]).unwrap(),
        MethodInfo::new("helper", "(I)I", vec![var("arg", TypeTag::Int32, 0)]).unwrap(),
    ]
}

async fn two_method_target() -> Harness {
    Harness::start(
        config(two_method_memory()),
        two_methods(),
        vec![
            (stack_address_symbol(CLASS, "run", "()V"), TABLE),
            (stack_address_symbol(CLASS, "helper", "(I)I"), HELPER_TABLE),
        ],
        ResolveOptions::default(),
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_frames_resolve_concurrently_in_frame_order() {
    let harness = two_method_target().await;
    let stack = SuspendedStack::new(vec![
        StackFrame::new(CLASS, HELPER, 3),
        StackFrame::new(CLASS, METHOD, 10),
        StackFrame::new("com.example.Gone", METHOD, 1),
    ]);

    let results = harness.session.resolve_all_frames(&stack).await;
    assert_eq!(results.len(), 3);

    let helper = results[0].as_ref().unwrap();
    assert_eq!(helper.frame_index, 0);
    assert_eq!(helper.method.name, "helper");
    assert_eq!(helper.values[0].value, Ok(DecodedValue::Int32(-5)));

    let run = results[1].as_ref().unwrap();
    assert_eq!(run.frame_index, 1);
    assert_eq!(run.method.name, "run");
    assert_eq!(run.values[0].value, Ok(DecodedValue::Int32(42)));

    assert!(matches!(
        &results[2],
        Err(ResolveError::ClassNotFound { class, .. }) if class == "com.example.Gone"
    ));
    assert_eq!(harness.session.queue().pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolutions_share_the_class_cache() {
    let harness = two_method_target().await;
    let stack = SuspendedStack::new(vec![StackFrame::new(CLASS, METHOD, 10)]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let session = harness.session.clone();
            let stack = stack.clone();
            tokio::spawn(async move { session.resolve_top_frame(&stack).await })
        })
        .collect();
    for task in tasks {
        let frame = task.await.unwrap().unwrap();
        assert_eq!(frame.values[0].value, Ok(DecodedValue::Int32(42)));
    }

    let classes = Arc::clone(harness.session.classes());
    assert_eq!(classes.loaded_count(), 1);
    assert_eq!(harness.target.received_commands().await.len(), 8 * 6);
}

/// Resolves the helper's table and panics for anything else.
struct HelperOnlySymbols;

impl SymbolResolver for HelperOnlySymbols {
    fn resolve(&self, symbol: &str) -> Option<u64> {
        if symbol == stack_address_symbol(CLASS, "helper", "(I)I") {
            return Some(HELPER_TABLE);
        }
        panic!("symbol table is corrupt at {symbol}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicked_frame_task_still_publishes_a_failure() {
    let target = MockTargetServer::spawn(two_method_memory()).await.unwrap();
    let queue = CommandQueue::connect(target.addr()).await.unwrap();
    let class = ClazzInfo::new(CLASS, two_methods()).unwrap();
    let classes = Arc::new(ClassRegistry::new(MemoryClassSource::new().with_class(class)));
    let session = DebugSession::new(queue, classes, Arc::new(HelperOnlySymbols));
    let mut observer = session.subscribe();

    let stack = SuspendedStack::new(vec![
        StackFrame::new(CLASS, HELPER, 3),
        StackFrame::new(CLASS, METHOD, 10),
    ]);
    let results = session.resolve_all_frames(&stack).await;

    assert_eq!(results[0].as_ref().unwrap().values.len(), 1);
    let aborted = ResolveError::Transport("frame task aborted".into());
    assert_eq!(results[1], Err(aborted.clone()));

    let events = drain(&mut observer);
    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 2);
    assert!(terminal.contains(&&SessionEvent::Done {
        frame: 0,
        emitted: 1,
    }));
    assert!(terminal.contains(&&SessionEvent::Failed {
        frame: 1,
        error: aborted,
    }));
}

#[tokio::test]
async fn empty_stack_yields_a_single_failure() {
    let harness = two_method_target().await;
    let results = harness
        .session
        .resolve_all_frames(&SuspendedStack::default())
        .await;
    assert_eq!(results, [Err(ResolveError::EmptyStack)]);
}
