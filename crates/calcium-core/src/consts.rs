/// Minimum number of pending keys before a populate pass fans out over Rayon.
pub const PARALLEL_KEY_THRESHOLD: usize = 2;

/// Number of hex characters kept from the parameter digest (128 bits).
pub const CONTENT_HASH_HEX_LEN: usize = 32;

/// Parameter key that overrides the segmentation channel reported by a loader.
pub const SEGMENTATION_CHANNEL_PARAM: &str = "segmentation_channel";

/// Per-plane scalar metadata written next to the suite2p arrays.
pub const SUITE2P_OPS_FILE: &str = "ops.json";

/// Per-ROI statistics written next to the suite2p arrays.
pub const SUITE2P_STAT_FILE: &str = "stat.json";

/// Cell classifier output; its presence marks a segmented suite2p plane.
pub const SUITE2P_ISCELL_FILE: &str = "iscell.npy";

/// Directory name prefix of suite2p per-plane outputs.
pub const SUITE2P_PLANE_PREFIX: &str = "plane";

/// Suite2p writes a merged view of all planes here; it duplicates the planes.
pub const SUITE2P_COMBINED_DIR: &str = "combined";

/// Classification method recorded for suite2p `iscell` output.
pub const SUITE2P_CLASSIFIER: &str = "suite2p_default_classifier";

/// Classification method recorded for CaImAn `idx_components`.
pub const CAIMAN_CLASSIFIER: &str = "caiman_default_classifier";

/// Members every CaImAn result archive must carry.
pub const CAIMAN_REQUIRED_MEMBERS: [&str; 8] = [
    "motion_correction/reference_image",
    "motion_correction/correlation_image",
    "motion_correction/average_image",
    "motion_correction/max_image",
    "estimates/A/data",
    "estimates/A/indices",
    "estimates/A/indptr",
    "estimates/A/shape",
];

/// Archive holding EXTRACT spatial and temporal weights.
pub const EXTRACT_OUTPUT_FILE: &str = "extract_output.npz";

/// Members the EXTRACT archive must carry.
pub const EXTRACT_REQUIRED_MEMBERS: [&str; 2] = ["spatial_weights", "temporal_weights"];

/// Directory EXTRACT runs place their suite2p registration output in.
pub const EXTRACT_REGISTRATION_DIR: &str = "suite2p";
