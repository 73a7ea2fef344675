//! `GET /layers/{layer}/partitions` response (spec §6).

use serde::{Deserialize, Serialize};

use crate::model::Partition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionsResponse {
    pub partitions: Vec<Partition>,
}
