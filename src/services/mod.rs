pub mod agreement_engine;
pub mod anchor_engine;
pub mod cid_registry;
pub mod event_log;
pub mod fingerprint_engine;
pub mod intent_logger;
pub mod lifecycle_registry;
pub mod multisig_engine;
pub mod otp_engine;
pub mod session_engine;
