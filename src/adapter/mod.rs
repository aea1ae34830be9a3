//! Hardware audio-chain SDK boundary.
//!
//! The engine never talks to the audio hardware directly: every default
//! phase handler goes through [`HardwareAdapter`], a narrow call surface
//! over the underlying chain SDK (chunk/algorithm creation, pin wiring,
//! pipe transport). Ports bind a real SDK behind this trait; the shipped
//! [`NullAdapter`] accepts everything and is useful for headless editing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handle to a hardware buffer ("chunk") created for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkHandle(pub u32);

/// Handle to an algorithm instance declared to the hardware chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AlgoHandle(pub u32);

/// Transport commands for the hardware pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayCommand {
    /// Start rendering the built chain.
    Start,
    /// Stop a running chain.
    Stop,
    /// Abort a partially built chain and release its resources.
    Cleanup,
}

/// Signal format carried by a chunk.
///
/// Kept separate from any SDK struct so the graph layer never depends on
/// hardware headers; adapters translate field by field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Frames per block.
    pub frames: u8,
    /// Whether channel samples are interleaved.
    pub interleaved: bool,
}

impl ChunkFormat {
    /// Creates a format with the given rate and channel count.
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            frames: 4,
            interleaved: true,
        }
    }
}

impl Default for ChunkFormat {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

/// Failures reported by the hardware adapter.
///
/// The orchestrator counts these per build instead of aborting mid-phase;
/// a non-zero count after the last phase fails the whole build.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The SDK rejected the call with a status code.
    #[error("adapter call failed with status {0}")]
    Status(u32),
    /// The adapter has no pipe to operate on.
    #[error("no hardware pipe created")]
    NoPipe,
    /// The referenced handle is unknown to the adapter.
    #[error("unknown hardware handle")]
    UnknownHandle,
}

/// The narrow boundary to the hardware audio-chain SDK.
///
/// One call per SDK entry point used by the default phase handlers. Every
/// call returns a result; failures are counted by the build and drive the
/// abort-to-cleanup path rather than a panic.
pub trait HardwareAdapter: Send {
    /// Creates the hardware pipe a build will populate.
    fn create_pipe(&mut self) -> Result<(), AdapterError>;

    /// Allocates a chunk buffer with the given signal format.
    fn create_chunk(&mut self, format: &ChunkFormat) -> Result<ChunkHandle, AdapterError>;

    /// Declares an algorithm instance for `element`, named `var_name`.
    fn create_algorithm(&mut self, element: &str, var_name: &str)
        -> Result<AlgoHandle, AdapterError>;

    /// Applies one static configuration value to an algorithm.
    fn set_static_config(
        &mut self,
        algo: AlgoHandle,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError>;

    /// Applies one common (SDK-level) configuration value to an algorithm.
    fn set_common_config(
        &mut self,
        algo: AlgoHandle,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError>;

    /// Wires an upstream chunk into an algorithm input pin.
    fn connect_pin_in(
        &mut self,
        algo: AlgoHandle,
        pin: usize,
        chunk: ChunkHandle,
    ) -> Result<(), AdapterError>;

    /// Wires an algorithm output pin to its chunk.
    fn connect_pin_out(
        &mut self,
        algo: AlgoHandle,
        pin: usize,
        chunk: ChunkHandle,
    ) -> Result<(), AdapterError>;

    /// Wires two algorithm pins directly (no intermediate chunk).
    fn connect_pins(
        &mut self,
        from: (AlgoHandle, usize),
        to: (AlgoHandle, usize),
    ) -> Result<(), AdapterError>;

    /// Drives the pipe transport.
    fn play(&mut self, cmd: PlayCommand) -> Result<(), AdapterError>;

    /// Returns true while the hardware pipe is rendering.
    fn is_playing(&self) -> bool;
}

/// Adapter that accepts every call and renders nothing.
///
/// Handles are plain counters. Used for headless graph editing and as the
/// baseline for tests that only care about graph/database behavior.
#[derive(Default)]
pub struct NullAdapter {
    next_handle: u32,
    pipe_created: bool,
    playing: bool,
}

impl NullAdapter {
    /// Creates a new null adapter.
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl HardwareAdapter for NullAdapter {
    fn create_pipe(&mut self) -> Result<(), AdapterError> {
        self.pipe_created = true;
        Ok(())
    }

    fn create_chunk(&mut self, _format: &ChunkFormat) -> Result<ChunkHandle, AdapterError> {
        Ok(ChunkHandle(self.next()))
    }

    fn create_algorithm(
        &mut self,
        _element: &str,
        _var_name: &str,
    ) -> Result<AlgoHandle, AdapterError> {
        Ok(AlgoHandle(self.next()))
    }

    fn set_static_config(
        &mut self,
        _algo: AlgoHandle,
        _key: &str,
        _value: &str,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn set_common_config(
        &mut self,
        _algo: AlgoHandle,
        _key: &str,
        _value: &str,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn connect_pin_in(
        &mut self,
        _algo: AlgoHandle,
        _pin: usize,
        _chunk: ChunkHandle,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn connect_pin_out(
        &mut self,
        _algo: AlgoHandle,
        _pin: usize,
        _chunk: ChunkHandle,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn connect_pins(
        &mut self,
        _from: (AlgoHandle, usize),
        _to: (AlgoHandle, usize),
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn play(&mut self, cmd: PlayCommand) -> Result<(), AdapterError> {
        match cmd {
            PlayCommand::Start => self.playing = true,
            PlayCommand::Stop | PlayCommand::Cleanup => self.playing = false,
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(test)]
pub mod testing {
    //! Call-recording adapter shared by builder and pipe tests.

    use super::*;
    use std::collections::HashSet;

    /// Records every adapter call as a compact string and can be told to
    /// fail specific entry points.
    #[derive(Default)]
    pub struct RecordingAdapter {
        /// Call log, one entry per adapter invocation.
        pub calls: Vec<String>,
        /// Entry-point names that should fail (e.g. `"create_algorithm"`).
        pub fail_on: HashSet<&'static str>,
        next_handle: u32,
        playing: bool,
    }

    impl RecordingAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(points: &[&'static str]) -> Self {
            Self {
                fail_on: points.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn check(&self, point: &'static str) -> Result<(), AdapterError> {
            if self.fail_on.contains(point) {
                Err(AdapterError::Status(1))
            } else {
                Ok(())
            }
        }

        fn next(&mut self) -> u32 {
            self.next_handle += 1;
            self.next_handle
        }

        /// Returns the calls whose log entry starts with `prefix`.
        pub fn calls_with(&self, prefix: &str) -> Vec<&str> {
            self.calls
                .iter()
                .filter(|c| c.starts_with(prefix))
                .map(|c| c.as_str())
                .collect()
        }
    }

    impl HardwareAdapter for RecordingAdapter {
        fn create_pipe(&mut self) -> Result<(), AdapterError> {
            self.calls.push("create_pipe".to_string());
            self.check("create_pipe")
        }

        fn create_chunk(&mut self, format: &ChunkFormat) -> Result<ChunkHandle, AdapterError> {
            self.calls.push(format!(
                "create_chunk {}Hz x{}",
                format.sample_rate, format.channels
            ));
            self.check("create_chunk")?;
            Ok(ChunkHandle(self.next()))
        }

        fn create_algorithm(
            &mut self,
            element: &str,
            var_name: &str,
        ) -> Result<AlgoHandle, AdapterError> {
            self.calls
                .push(format!("create_algorithm {} {}", element, var_name));
            self.check("create_algorithm")?;
            Ok(AlgoHandle(self.next()))
        }

        fn set_static_config(
            &mut self,
            algo: AlgoHandle,
            key: &str,
            value: &str,
        ) -> Result<(), AdapterError> {
            self.calls
                .push(format!("set_static_config {} {}={}", algo.0, key, value));
            self.check("set_static_config")
        }

        fn set_common_config(
            &mut self,
            algo: AlgoHandle,
            key: &str,
            value: &str,
        ) -> Result<(), AdapterError> {
            self.calls
                .push(format!("set_common_config {} {}={}", algo.0, key, value));
            self.check("set_common_config")
        }

        fn connect_pin_in(
            &mut self,
            algo: AlgoHandle,
            pin: usize,
            chunk: ChunkHandle,
        ) -> Result<(), AdapterError> {
            self.calls
                .push(format!("connect_pin_in {} pin{} chunk{}", algo.0, pin, chunk.0));
            self.check("connect_pin_in")
        }

        fn connect_pin_out(
            &mut self,
            algo: AlgoHandle,
            pin: usize,
            chunk: ChunkHandle,
        ) -> Result<(), AdapterError> {
            self.calls.push(format!(
                "connect_pin_out {} pin{} chunk{}",
                algo.0, pin, chunk.0
            ));
            self.check("connect_pin_out")
        }

        fn connect_pins(
            &mut self,
            from: (AlgoHandle, usize),
            to: (AlgoHandle, usize),
        ) -> Result<(), AdapterError> {
            self.calls.push(format!(
                "connect_pins {}:{} -> {}:{}",
                from.0 .0, from.1, to.0 .0, to.1
            ));
            self.check("connect_pins")
        }

        fn play(&mut self, cmd: PlayCommand) -> Result<(), AdapterError> {
            self.calls.push(format!("play {:?}", cmd));
            self.check("play")?;
            match cmd {
                PlayCommand::Start => self.playing = true,
                PlayCommand::Stop | PlayCommand::Cleanup => self.playing = false,
            }
            Ok(())
        }

        fn is_playing(&self) -> bool {
            self.playing
        }
    }
}
