use std::collections::HashMap;

use rdb_config::{connect_session, init_tracing, ConfigError, DebuggerConfig};
use rdb_metadata::{stack_address_symbol, ClazzInfo, LocalVariableInfo, MethodInfo, TypeTag};
use rdb_stack::{DecodedValue, StackFrame, SuspendedStack};
use rdb_wire::mock::{MockTargetServer, TargetMemory};
use tempfile::tempdir;

fn write_debug_info(dir: &std::path::Path) {
    let class = ClazzInfo::new(
        "app.Main",
        vec![MethodInfo::new(
            "run",
            "()V",
            vec![LocalVariableInfo {
                name: "count".into(),
                type_tag: TypeTag::Int32,
                memory_offset: 0,
                size_bytes: 4,
                scope_start_line: 1,
                scope_end_line: 30,
                slot_index: 0,
            }],
        )
        .unwrap()],
    )
    .unwrap();
    std::fs::create_dir_all(dir.join("classes").join("app")).unwrap();
    std::fs::write(
        dir.join("classes").join("app").join("Main.json"),
        serde_json::to_string(&class).unwrap(),
    )
    .unwrap();

    let symbols: HashMap<String, u64> =
        [(stack_address_symbol("app.Main", "run", "()V"), 0x9000)].into();
    std::fs::write(dir.join("symbols.json"), serde_json::to_string(&symbols).unwrap()).unwrap();
}

#[tokio::test]
async fn configured_session_resolves_against_target() {
    let dir = tempdir().unwrap();
    write_debug_info(dir.path());

    let mut memory = TargetMemory::new();
    memory
        .write(0x1010, 0x2000u64.to_be_bytes())
        .write(0x1018, 0x3000u64.to_be_bytes())
        .write_c_string(0x2000, "run")
        .write_c_string(0x3000, "()V")
        .write(0x9000, 0x4000i64.to_be_bytes())
        .write(0x4000, 42i32.to_be_bytes());
    let target = MockTargetServer::spawn(memory).await.unwrap();

    let config_path = dir.path().join("rdb.toml");
    std::fs::write(
        &config_path,
        format!(
            "[transport]\naddress = \"{}\"\n\n[metadata]\nclass_dir = \"classes\"\nsymbols = \"symbols.json\"\n\n[logging]\nstderr = false\n",
            target.addr()
        ),
    )
    .unwrap();
    let config = DebuggerConfig::load_from_path(&config_path).unwrap();
    init_tracing(&config.logging);

    let session = connect_session(&config).await.unwrap();
    let stack = SuspendedStack::new(vec![StackFrame::new("app.Main", 0x1000, 5)]);
    let frame = session.resolve_top_frame(&stack).await.unwrap();

    assert_eq!(frame.values.len(), 1);
    assert_eq!(frame.values[0].value, Ok(DecodedValue::Int32(42)));
    assert_eq!(session.classes().loaded_count(), 1);
}

#[tokio::test]
async fn missing_symbol_file_fails_before_connecting() {
    let dir = tempdir().unwrap();
    let mut config = DebuggerConfig::default();
    config.metadata.symbols = Some(dir.path().join("absent.json"));

    let err = connect_session(&config).await.unwrap_err();
    assert!(matches!(err, ConfigError::Metadata(_)));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_connecting() {
    let mut config = DebuggerConfig::default();
    config.transport.reply_timeout_ms = 0;

    assert!(matches!(
        connect_session(&config).await,
        Err(ConfigError::Invalid { .. })
    ));
}
