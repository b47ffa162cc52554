//! Asynchronous message listener library.
//! Provides a bounded-concurrency container that polls message producers and dispatches every
//! message to a listener, with pluggable interception, acknowledgement and error handling.
//! The optional in-memory queue offers a visibility-timeout transport to run containers against.

pub use container::{
    AcknowledgementMode, Acknowledgement, AlwaysAckHandler, AsyncAckHandler,
    AsyncErrorHandler, AsyncMessageInterceptor, AsyncMessageListener, AsyncMessageProducer,
    BackOffOptions, CallbackMessageListener, CompositeInterceptor, ContainerOptions,
    ContainerOptionsBuilder, Error, LifecycleHooks, ListenerContainer,
    ListenerContainerBuilder, ListenerKind, LoggingErrorHandler, ManagedResource, Message,
    MessageBuilder, MessageHeaders, MessageListenerContainer,
    MessageListenerContainerRegistry, NeverAckHandler, OnSuccessAckHandler, ResultCallback,
    Task, TaskExecutor, TokioExecutor, TrackedExecutor, ack_handler_for, headers, submit,
};

#[cfg(feature = "memory-queue")]
pub use queue::{
    Error as QueueError, MemoryQueue, QueueAcknowledgement, QueueProducer, ReceivedMessage,
    VisibilityBackoffErrorHandler,
};
