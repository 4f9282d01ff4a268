pub mod auto_patch;
pub mod blue_team;
pub mod dep_drift;
pub mod llm_fuzzer;
pub mod shadow_clone;
pub mod timing_map;
