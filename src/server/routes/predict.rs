//! Prediction endpoint

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    Json,
};
use tracing::info;

use crate::inference::{Prediction, PredictionRequest};
use crate::server::state::SharedState;
use crate::utils::error::{DetectorError, Result};

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Pull the `file` field out of a multipart body
///
/// A body without that field is treated the same as an upload without a filename.
async fn read_upload(multipart: &mut Multipart) -> Result<PredictionRequest> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectorError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DetectorError::BadRequest(e.body_text()))?;

        return Ok(PredictionRequest::new(file_name, content_type, bytes.to_vec()));
    }

    Err(DetectorError::MissingFile)
}

/// POST /predict - Classify an uploaded image
pub async fn predict(
    State(state): State<SharedState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>> {
    let mut multipart = multipart.map_err(|e| DetectorError::BadRequest(e.body_text()))?;
    let request = read_upload(&mut multipart).await?;

    let prediction = state.predictor.predict_request(&request)?;

    info!(
        "Predicted label={}, score={:.4}, file={}",
        prediction.label,
        prediction.score,
        request.file_name.as_deref().unwrap_or_default()
    );

    Ok(Json(prediction.rounded()))
}
