use thiserror::Error;

// Classified errors for the data layer. A field that is simply absent from a
// payload is never an error; it decodes to `None`. Everything here signals
// either malformed upstream data or a failed remote operation.
#[derive(Debug, Error)]
pub enum DataError {
    // A path resolver hit a present, non-object value where it still had
    // segments left to walk. The payload does not have the expected shape.
    #[error("expected a JSON object at segment `{segment}` while resolving `{path}`")]
    UnexpectedShape { path: String, segment: String },

    // A value was located but the declared coercion could not be applied.
    #[error("cannot decode field `{field}` from path `{path}`: {reason}")]
    Coercion {
        field: &'static str,
        path: &'static str,
        reason: String,
    },

    // A value the upstream service always sends was missing.
    #[error("missing required value at `{path}`")]
    MissingValue { path: String },

    // A record carried the wrong discriminator tag for the entity kind being
    // constructed, e.g. a non-grade record fed to the Grade constructor.
    #[error("unexpected discriminator tag {found}, expected {expected}")]
    UnexpectedTag { expected: i64, found: i64 },

    // The remote endpoint answered, but not with success.
    #[error("remote call `{endpoint}` failed: {message}")]
    Remote { endpoint: String, message: String },

    // Transport-level failure from the HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
