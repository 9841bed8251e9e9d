//! Shader programs: the permutation flags, WGSL generation and the resolver
//! that caches one compiled program per variant.

pub mod shader;
