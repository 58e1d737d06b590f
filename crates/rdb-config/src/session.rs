use std::sync::Arc;

use rdb_metadata::{ClassRegistry, DirectoryClassSource, SymbolTable};
use rdb_stack::DebugSession;
use rdb_wire::CommandQueue;

use crate::{ConfigError, DebuggerConfig};

/// Validate `config`, load the symbol table, connect to the target and return a
/// ready session. Class metadata is loaded lazily from `metadata.class_dir`.
pub async fn connect_session(config: &DebuggerConfig) -> Result<DebugSession, ConfigError> {
    config.validate()?;

    let symbols = match &config.metadata.symbols {
        Some(path) => SymbolTable::load_json(path)?,
        None => {
            tracing::warn!(
                target: "rdb.config",
                "no symbol table configured; stack address lookups will fail"
            );
            SymbolTable::new()
        }
    };
    let classes = ClassRegistry::new(DirectoryClassSource::new(&config.metadata.class_dir));

    let queue =
        CommandQueue::connect_with_config(config.transport.address, config.transport.queue_config())
            .await?;
    tracing::info!(
        target: "rdb.config",
        address = %config.transport.address,
        symbols = symbols.len(),
        "connected to target"
    );

    Ok(DebugSession::new(queue, Arc::new(classes), Arc::new(symbols))
        .with_options(config.resolve_options()))
}
