use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// The JSON error body every endpoint returns on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

fn flatten_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors
                .iter()
                .map(|error| match &error.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: invalid value", field),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    messages.sort();
    messages.join("; ")
}

/// Runs `validator` checks and folds failures into a 400 response.
pub trait ValidateRequest {
    fn validate_request(&self) -> Result<(), AppError>;
}

impl<T: Validate> ValidateRequest for T {
    fn validate_request(&self) -> Result<(), AppError> {
        self.validate()
            .map_err(|errors| AppError::Validation(flatten_errors(&errors)))
    }
}
