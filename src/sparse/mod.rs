//! Sparse bind planning and residency-metadata validation.
//!
//! Planning is split from execution: the planner walks resource geometry and
//! produces plain region descriptions, and a separate materialization step
//! turns regions into bind structures backed by fresh allocations. The pure
//! half is testable without a device.

pub mod planner;
pub mod residency;

pub use planner::{
    aligned_divide, materialize_block_binds, materialize_buffer_binds, materialize_opaque_binds,
    plan_buffer_binds, plan_image_binds, plan_metadata_binds, BlockBindRegion, BlockGrid,
    ImageBindPlan, OpaqueBindRegion, ResidencyPattern,
};
pub use residency::{
    check_standard_block_shape, compressed_standard_block_shape, expected_mip_tail_first_lod,
    standard_block_shape, standard_shape_mandated, validate_sparse_requirements, ShapeCheck,
};
