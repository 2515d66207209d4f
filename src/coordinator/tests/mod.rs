use super::test_helpers::*;
use super::*;
use crate::engine::EngineEvent;
use crate::error::DownloadError;
use crate::types::TransferStatus;

const SOURCE: &str = "https://mirror.example.org/zim/wikipedia_en_all.zim";

mod reconcile;
