#![no_std]

mod assembler;
mod frame;
mod gateway;
mod ids;
mod link;
mod matrix;
mod signals;

// Radio        ID      Cluster
//   _                     _
//   |     --- 4D9 -->     |      08 C0 B9           open request
//   |     <-- 2E8 ---     |      39 ..              start acknowledge
//   |     --- 6B9 -->     |      A0 04 54 54 4A B2  preamble
//   |     <-- 699 ---     |      A1 ..              preamble acknowledge
//   |     --- 6B9 -->     |      2x d0 .. d6        data chunks, B(x+1) paced

/// Payload bytes per CAN frame, and therefore per communication chunk.
pub const CHUNK_SIZE: usize = 8;

/// Communication buffer capacity: room for two maximal display frames.
pub const FRAME_BUFFER_CAPACITY: usize = 128;

pub use assembler::*;
pub use frame::*;
pub use gateway::*;
pub use ids::*;
pub use link::*;
pub use matrix::*;
pub use signals::*;

pub use embedded_can::StandardId;
