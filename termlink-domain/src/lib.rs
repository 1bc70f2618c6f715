//! Termlink Domain Layer
//!
//! Pure types shared by the gateway client with zero I/O dependencies:
//! credentials, identifiers, and the tagged request/response and stream
//! message types the remote trading terminal speaks.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
#[allow(missing_docs)]
pub mod requests;
#[allow(missing_docs)]
pub mod stream;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::Credentials;
pub use requests::{
    AccountSummary, GatewayRequest, GatewayResponse, OpenedOrder, OrderCloseRequest,
    OrderSendRequest, OrderSide, OrderTicket, Quote,
};
pub use stream::{OrderUpdate, OrderUpdateAction, StreamEvent, StreamRequest};
pub use value_objects::{
    DomainError, DomainResult, Endpoint, Lots, OperationClass, SessionId, Symbol,
    TerminalInstanceId, Ticket,
};
