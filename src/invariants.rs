//! Debug assertion macros for bus invariants.
//!
//! These macros provide runtime checks for the invariants documented in
//! `SPEC_FULL.md` §8. They are only active in debug builds
//! (`#[cfg(debug_assertions)]`), so there is zero overhead in release builds.

// =============================================================================
// INV-RING-01: Never Both Full and Empty
// =============================================================================

/// Assert that ring occupancy never exceeds `capacity - 1` (one slot is
/// always left empty to disambiguate full from empty).
///
/// Used in: `Ring::try_send` after computing occupancy.
macro_rules! debug_assert_ring_occupancy {
    ($occupied:expr, $capacity:expr) => {
        debug_assert!(
            $occupied < $capacity,
            "INV-RING-01 violated: occupancy {} reached capacity {}",
            $occupied,
            $capacity
        )
    };
}

// =============================================================================
// INV-RING-02: Monotonic Counters
// =============================================================================

/// Assert that `head`/`tail` only advance (using wrapping comparison).
///
/// Used in: `Ring::try_send` after storing tail, `Ring::try_recv` after
/// storing head.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new.wrapping_sub($old) < (1u64 << 32),
            "INV-RING-02 violated: {} went from {} to {} (non-monotonic)",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-RING-03: Enqueue Counter Never Behind Dequeue Counter
// =============================================================================

/// Assert that a ring's cumulative enqueue count is never less than its
/// dequeue count.
///
/// Used in: `Ring::try_recv` after incrementing the dequeue counter.
macro_rules! debug_assert_enqueue_ge_dequeue {
    ($enqueue:expr, $dequeue:expr) => {
        debug_assert!(
            $enqueue >= $dequeue,
            "INV-RING-03 violated: enqueue count {} is behind dequeue count {}",
            $enqueue,
            $dequeue
        )
    };
}

// =============================================================================
// INV-REG-01: Module Id In Range
// =============================================================================

/// Assert a module id falls within `[0, module_id_max]`.
///
/// Used in: `Bus::create`, recv drain loop after resolving a handle to a
/// ring (a delete-module race may hand back a stale src/dst).
macro_rules! debug_assert_id_in_range {
    ($id:expr, $max:expr) => {
        debug_assert!(
            $id <= $max,
            "INV-REG-01 violated: module id {} exceeds module_id_max {}",
            $id,
            $max
        )
    };
}

// =============================================================================
// INV-REG-02: Name Directory Consistency
// =============================================================================

/// Assert that a name directory entry resolves back to the module that owns
/// it.
///
/// Used in: `NameDirectory::register` before insertion.
macro_rules! debug_assert_name_unbound {
    ($existing:expr) => {
        debug_assert!(
            $existing.is_none(),
            "INV-REG-02 violated: name already bound to module {:?}",
            $existing
        )
    };
}

pub(crate) use debug_assert_enqueue_ge_dequeue;
pub(crate) use debug_assert_id_in_range;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_name_unbound;
pub(crate) use debug_assert_ring_occupancy;
