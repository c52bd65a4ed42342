pub mod channel;
pub mod codec;
pub mod command;
pub mod config;
pub mod constants;
pub mod diagnosis;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod probe;
pub mod session;

// Re-export the main entry points for easy access
pub use channel::{ChannelError, DeviceChannel, WriteMode};
pub use codec::{EncryptedPacket, Frame, PacketCodec, ProtocolProfile};
pub use command::{Command, Opcode, Rgb};
pub use config::{DiagnosticConfig, SessionConfig};
pub use diagnosis::{Confidence, Diagnosis, FaultCategory, classify};
pub use engine::{DiagnosticEngine, diagnose, run_diagnostics};
pub use error::LedError;
pub use feedback::{NoFeedback, OperatorFacts, OperatorFeedback, ScriptedFeedback};
pub use probe::{Observation, Probe, ProbeId};
pub use session::{ConnectionState, DeviceSession, SendResult};
