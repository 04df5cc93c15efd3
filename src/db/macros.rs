//! Backend dispatch macro.
//!
//! Every engine adapter exposes the same method names, so dispatching over
//! [`BackendClient`](crate::db::BackendClient) is the same match repeated for
//! each operation. The macro expands at compile time with zero runtime
//! overhead.

/// Run the same expression against whichever adapter a `BackendClient` holds.
///
/// # Example
///
/// ```ignore
/// impl_backend_dispatch!(self, backend => backend.list_tables().await)
/// ```
#[macro_export]
macro_rules! impl_backend_dispatch {
    ($client:expr, $backend:ident => $body:expr) => {
        match $client {
            $crate::db::BackendClient::Sqlite($backend) => $body,
            $crate::db::BackendClient::Postgres($backend) => $body,
            $crate::db::BackendClient::MySql($backend) => $body,
            $crate::db::BackendClient::MsSql($backend) => $body,
        }
    };
}

pub use impl_backend_dispatch;
