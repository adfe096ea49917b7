use std::path::PathBuf;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration options that control how a layer is accessed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the layer's root directory. It is canonicalized when the layer is loaded.
    ///
    /// Empty by default, so a layer loaded without setting it fails with
    /// [`LayerError::PathResolution`](crate::LayerError::PathResolution).
    pub layer: PathBuf,

    /// Whether metadata queries should try `statx(2)` first. When the kernel does not implement it
    /// the layer falls back to `fstat(2)` on its own, so this only needs to be turned off to force
    /// the fallback.
    ///
    /// The default value for this option is `true`.
    pub statx: bool,

    /// Whether opens should be confined to the layer root with `openat2(2)` and
    /// `RESOLVE_IN_ROOT`. Kernels without `openat2` fall back to plain `openat(2)`.
    ///
    /// The default value for this option is `true`.
    pub resolve_in_root: bool,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Config {
            layer: PathBuf::new(),
            statx: true,
            resolve_in_root: true,
        }
    }
}
