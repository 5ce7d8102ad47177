use smol_str::SmolStr;

use super::lua_limits::{CONTAINER_INCREMENTAL, MAX_CALL_DEPTH};

/// Per-state configuration.
#[derive(Debug, Clone)]
pub struct BindOption {
    /// Name of the global library table exposing `Type`, `IsValid`, `Cast`
    /// and the collection helpers.
    pub lib_name: SmolStr,
    /// Push declared pointers as tagged light userdata when the `light-ud`
    /// feature is compiled in. Ignored otherwise.
    pub light_userdata: bool,
    /// Growth step of the weak index cache.
    pub cache_increment: usize,
    pub max_call_depth: usize,
}

impl Default for BindOption {
    fn default() -> Self {
        Self {
            lib_name: SmolStr::new_static("bind"),
            light_userdata: true,
            cache_increment: CONTAINER_INCREMENTAL,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

impl BindOption {
    /// Full userdata only, regardless of the `light-ud` feature.
    pub fn without_light_userdata() -> Self {
        Self {
            light_userdata: false,
            ..Self::default()
        }
    }
}
