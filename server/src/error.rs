use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use supervisor::{types::DatasetId, ErrorKind, SupervisorError};
use thiserror::Error;

/// Error type of every handler. Renders as `{"error": .., "code": ..}` plus
/// whatever context the failure carries.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// A failure tied to one dataset; the id is echoed in the body.
    #[error("{source}")]
    Dataset {
        dataset_id: DatasetId,
        #[source]
        source: SupervisorError,
    },

    #[error("{0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn for_dataset(dataset_id: impl Into<DatasetId>, source: SupervisorError) -> Self {
        AppError::Dataset {
            dataset_id: dataset_id.into(),
            source,
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            AppError::Supervisor(err) | AppError::Dataset { source: err, .. } => err.kind(),
            AppError::BadRequest(_) => ErrorKind::InvalidInput,
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound | ErrorKind::ArtifactMissing | ErrorKind::NotRunning => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::AlreadyRunning => StatusCode::CONFLICT,
        ErrorKind::PreprocessTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::LaunchError | ErrorKind::PreprocessFailed | ErrorKind::Unknown => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Extra body fields for the variants that carry something a client can use.
fn context(err: &SupervisorError, body: &mut Map<String, Value>) {
    match err {
        SupervisorError::AlreadyRunning { pid } => {
            body.insert("pid".into(), json!(pid));
            body.insert("status".into(), json!("already_running"));
        }
        SupervisorError::ArtifactMissing { expected_path } => {
            body.insert("expected_path".into(), json!(expected_path.display().to_string()));
        }
        SupervisorError::NotRunning => {
            body.insert("status".into(), json!("not_running"));
        }
        SupervisorError::PreprocessFailed(_) => {
            body.insert("status".into(), json!("failed"));
        }
        SupervisorError::PreprocessTimeout { .. } => {
            body.insert("status".into(), json!("timeout"));
        }
        _ => {}
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);

        let message = if kind == ErrorKind::Unknown {
            tracing::error!(error = %self, "internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let mut body = Map::new();
        body.insert("error".into(), json!(message));
        body.insert("code".into(), json!(kind.as_str()));
        match &self {
            AppError::Supervisor(err) => context(err, &mut body),
            AppError::Dataset { dataset_id, source } => {
                body.insert("dataset_id".into(), json!(dataset_id));
                context(source, &mut body);
            }
            AppError::BadRequest(_) => {}
        }

        (status, Json(Value::Object(body))).into_response()
    }
}
