//! Guest physical memory access shared by the disk firmware and the storage device models.
//!
//! The firmware touches guest memory for two reasons: to move sector data in and out of the
//! caller's real-mode buffers, and to build AHCI command structures that the HBA fetches by DMA.
//! Both sides go through [`MemoryBus`], so device models and firmware can share one backing
//! store in tests.

mod bus;
mod dense;

pub use bus::MemoryBus;
pub use dense::DenseMemory;
