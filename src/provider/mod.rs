// Terrain provider: fetch, decode, cache, and coordinate tile requests
//
// The service sits in front of the external transport and the packet
// decoder. It owns the decoded-buffer cache and the in-flight request map;
// concurrent requests that resolve to the same stored node share a single
// fetch+decode and observe one consistent outcome.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod packet;
pub mod service;

pub use cache::{CacheStats, TerrainCache};
pub use config::ProviderConfig;
pub use fetch::{FetchError, TileFetcher};
pub use packet::{DecodeError, PacketDecoder, PackedTileDecoder, TilePacket};
pub use service::TerrainService;
