use std::sync::Arc;
use std::time::Duration;

use rdb_metadata::{ClassRegistry, SymbolResolver};
use rdb_wire::{CommandQueue, ListenerId, ListenerSet};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::decode::LocalVariableValue;
use crate::error::ResolveError;
use crate::events::{Observer, SessionEvent};
use crate::frame::SuspendedStack;
use crate::layout::{ByteOrder, MethodLayout};
use crate::machine::{Action, FrameResolution, ResolvedMethod};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    pub layout: MethodLayout,
    pub byte_order: ByteOrder,
    /// Skip variables whose line scope does not contain the frame's line.
    pub skip_out_of_scope: bool,
    /// Per-command reply timeout. `None` uses the queue's configured timeout.
    pub reply_timeout: Option<Duration>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            layout: MethodLayout::CURRENT,
            byte_order: ByteOrder::Big,
            skip_out_of_scope: false,
            reply_timeout: None,
        }
    }
}

/// Everything decoded for one frame, in slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameVariables {
    pub frame_index: usize,
    pub method: ResolvedMethod,
    pub values: Vec<LocalVariableValue>,
}

/// Debugger-side handle tying the command queue to class metadata and symbols.
///
/// Cloning is cheap and clones share the same queue, caches and observers, so
/// several frames can be resolved concurrently.
#[derive(Clone)]
pub struct DebugSession {
    queue: CommandQueue,
    classes: Arc<ClassRegistry>,
    symbols: Arc<dyn SymbolResolver>,
    options: ResolveOptions,
    observers: Arc<ListenerSet<SessionEvent>>,
}

impl DebugSession {
    pub fn new(
        queue: CommandQueue,
        classes: Arc<ClassRegistry>,
        symbols: Arc<dyn SymbolResolver>,
    ) -> Self {
        Self {
            queue,
            classes,
            symbols,
            options: ResolveOptions::default(),
            observers: ListenerSet::new(),
        }
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    pub fn subscribe(&self) -> Observer {
        self.observers.register()
    }

    pub fn remove_observer(&self, id: ListenerId) -> bool {
        self.observers.remove(id)
    }

    pub async fn resolve_top_frame(
        &self,
        stack: &SuspendedStack,
    ) -> Result<FrameVariables, ResolveError> {
        self.resolve_frame(stack, 0).await
    }

    pub async fn resolve_frame(
        &self,
        stack: &SuspendedStack,
        index: usize,
    ) -> Result<FrameVariables, ResolveError> {
        self.resolve_frame_with_cancel(stack, index, CancellationToken::new())
            .await
    }

    /// Resolve frame `index`, stopping early once `cancel` fires.
    ///
    /// On cancellation this frame's listener is removed and
    /// [`ResolveError::Cancelled`] is returned. A late reply to the outstanding
    /// command is still delivered to the remaining listeners.
    pub async fn resolve_frame_with_cancel(
        &self,
        stack: &SuspendedStack,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<FrameVariables, ResolveError> {
        let Some(frame) = stack.get(index).cloned() else {
            let error = if stack.is_empty() {
                ResolveError::EmptyStack
            } else {
                ResolveError::NoSuchFrame {
                    index,
                    len: stack.len(),
                }
            };
            self.publish(SessionEvent::Failed {
                frame: index,
                error: error.clone(),
            });
            return Err(error);
        };

        let span = tracing::debug_span!(
            target: "rdb.stack",
            "resolve_frame",
            frame = index,
            class = %frame.class_name,
            method_pointer = frame.method_pointer,
        );
        let machine = FrameResolution::new(
            frame,
            self.classes.clone(),
            self.symbols.clone(),
            self.options.clone(),
        );
        let result = self.drive(index, machine, cancel).instrument(span).await;

        match &result {
            Ok(variables) => self.publish(SessionEvent::Done {
                frame: index,
                emitted: variables.values.len(),
            }),
            Err(error) => self.publish(SessionEvent::Failed {
                frame: index,
                error: error.clone(),
            }),
        }
        result
    }

    /// Resolve every frame of `stack` concurrently. Results are in frame order.
    ///
    /// A frame whose task dies before finishing still gets a `Failed` event.
    pub async fn resolve_all_frames(
        &self,
        stack: &SuspendedStack,
    ) -> Vec<Result<FrameVariables, ResolveError>> {
        if stack.is_empty() {
            return vec![self.resolve_frame(stack, 0).await];
        }

        let mut tasks = JoinSet::new();
        for index in 0..stack.len() {
            let session = self.clone();
            let stack = stack.clone();
            tasks.spawn(async move { (index, session.resolve_frame(&stack, index).await) });
        }

        let mut results: Vec<Option<Result<FrameVariables, ResolveError>>> =
            (0..stack.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(err) => {
                    tracing::warn!(target: "rdb.stack", error = %err, "frame task failed")
                }
            }
        }
        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| {
                    let error = ResolveError::Transport("frame task aborted".into());
                    self.publish(SessionEvent::Failed {
                        frame: index,
                        error: error.clone(),
                    });
                    Err(error)
                })
            })
            .collect()
    }

    async fn drive(
        &self,
        index: usize,
        mut machine: FrameResolution,
        cancel: CancellationToken,
    ) -> Result<FrameVariables, ResolveError> {
        let timeout = self
            .options
            .reply_timeout
            .unwrap_or(self.queue.config().reply_timeout);
        let mut listener = self.queue.register_listener();
        let mut values = Vec::new();

        let mut action = machine.start();
        loop {
            action = match action {
                Action::Submit(kind) => {
                    if cancel.is_cancelled() {
                        return Err(ResolveError::Cancelled);
                    }
                    let request_id = self.queue.submit(kind)?;
                    let command = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            // The command stays pending; its reply goes to whoever is
                            // still listening and is otherwise dropped as an orphan.
                            self.queue.remove_listener(listener.id());
                            tracing::debug!(
                                target: "rdb.stack",
                                request_id,
                                "resolution cancelled"
                            );
                            return Err(ResolveError::Cancelled);
                        }
                        command = listener.wait_for(request_id, timeout) => command?,
                    };
                    machine.on_command(&command)
                }
                Action::Emit(value) => {
                    self.publish(SessionEvent::Variable {
                        frame: index,
                        value: value.clone(),
                    });
                    values.push(value);
                    machine.resume()
                }
                Action::Done { method, .. } => {
                    return Ok(FrameVariables {
                        frame_index: index,
                        method,
                        values,
                    })
                }
                Action::Failed(error) => return Err(error),
            };
        }
    }

    fn publish(&self, event: SessionEvent) {
        let delivered = self.observers.dispatch(&event);
        tracing::trace!(
            target: "rdb.stack",
            frame = event.frame(),
            delivered,
            "published session event"
        );
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("options", &self.options)
            .field("classes", &self.classes)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
