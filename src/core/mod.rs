//! Request execution shared by every service client: credentials, retries,
//! error classification, pagination and batch aggregation.

pub mod batch;
pub mod credential;
pub mod error;
pub mod error_handler;
pub mod http_client;
pub mod middleware;
pub mod paging;
pub mod retry;
pub mod update_mask;


pub use batch::{BatchItemResult, BatchResponse, BulkResult, IndexedError};
pub use credential::{Credential, CredentialError, ServiceAccountCredential, StaticCredential};
pub use error::{Error, ErrorKind, HttpResponse, Result, ServiceError, ServiceErrorCode};
pub use error_handler::ErrorHandler;
pub use http_client::{ApiRequest, HttpClient};
pub use paging::{Page, PagedSequence};
pub use retry::{RetryOptions, RetryPolicy};
