//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::CourseSpec;
use crate::scheduler::{CourseArtifact, ProgressEvent, UnitView};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    GenerateCourse {
        spec: CourseSpec,
    },
    Subscribe {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Unsubscribe,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Course {
        artifact: CourseArtifact,
    },
    Subscribed {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Unsubscribed,
    UnitReady {
        #[serde(rename = "jobId")]
        job_id: String,
        index: usize,
        unit: UnitView,
    },
    ThumbnailReady {
        #[serde(rename = "jobId")]
        job_id: String,
        index: usize,
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
    CourseComplete {
        #[serde(rename = "jobId")]
        job_id: String,
        #[serde(rename = "fallbackUnits")]
        fallback_units: Vec<usize>,
    },
    Error {
        message: String,
    },
}

impl From<ProgressEvent> for ServerWsMessage {
    fn from(ev: ProgressEvent) -> Self {
        match ev {
            ProgressEvent::UnitReady { job_id, index, unit } => ServerWsMessage::UnitReady { job_id, index, unit },
            ProgressEvent::ThumbnailReady { job_id, index, image_url } => {
                ServerWsMessage::ThumbnailReady { job_id, index, image_url }
            }
            ProgressEvent::CourseComplete { job_id, fallback_units } => {
                ServerWsMessage::CourseComplete { job_id, fallback_units }
            }
        }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub oracle: String,
}

#[derive(Serialize)]
pub struct RemovedOut {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub removed: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
