//! Application services for the media pipeline
//!
//! [`UploadIntentIssuer`] opens a job and hands the client a direct upload
//! URL; [`CompletionReconciler`] folds worker outcomes back into the
//! processing record.

pub mod issuer;
pub mod reconciler;

pub use issuer::{CreateUploadRequest, IssuerError, UploadIntent, UploadIntentIssuer};
pub use reconciler::{CompletionReconciler, ReconcileError, ReconcileOutcome};
