use log::debug;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::error::DataError;

// The one capability the model layer needs from the outside world: perform a
// named remote call with a JSON body and hand back the parsed JSON response.
// Session handling, encryption and retry policy all live behind this seam.
pub trait Communication: Send + Sync {
    fn post(&self, endpoint: &str, body: &Value) -> Result<Value, DataError>;
}

// Plain HTTP implementation: POSTs the body as JSON to `{base_url}/{endpoint}`
// over a cookie-backed session.
pub struct HttpCommunication {
    client: Client,
    base_url: String,
}

impl HttpCommunication {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DataError> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl Communication for HttpCommunication {
    fn post(&self, endpoint: &str, body: &Value) -> Result<Value, DataError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        debug!("POST {url}");
        let response = self.client.post(&url).json(body).send()?;
        if !response.status().is_success() {
            return Err(DataError::Remote {
                endpoint: endpoint.to_string(),
                message: format!("status {}", response.status()),
            });
        }
        Ok(response.json()?)
    }
}
