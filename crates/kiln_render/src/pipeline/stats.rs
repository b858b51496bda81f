//! Culling statistics readback.
//!
//! With `RendererSettings::collect_statistics` the cullers bump the counters
//! of the stats buffer, and the "Read Statistics" pass copies it back to the
//! host. That copy is the pipeline's only CPU/GPU rendezvous, so it is
//! registered only when statistics are requested.

use crate::command::{
    STATS_MESHLETS_VISIBLE, STATS_OBJECTS_TESTED, STATS_OBJECTS_VISIBLE, STATS_SLOT_COUNT,
    STATS_TRIANGLES_VISIBLE,
};
use crate::graph::{Access, BufferHandle, GraphPass, PassBuilder, PassResources, RenderContext};

/// Readback tag of the statistics payload.
pub const STATISTICS_READBACK_TAG: u32 = 0x5354_4154;

/// Culling counters of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatistics {
    pub total_objects: u32,
    pub visible_objects: u32,
    /// Meshlets of the whole render scene.
    pub total_meshlets: u32,
    pub visible_meshlets: u32,
    pub visible_triangles: u32,
}

impl FrameStatistics {
    /// Decodes the stats buffer. `total_meshlets` comes from the scene, the
    /// device only tests meshlets of visible objects.
    #[must_use]
    pub fn from_counters(bytes: &[u8], total_meshlets: u32) -> Self {
        let slot = |index: usize| {
            bytes
                .get(index * 4..index * 4 + 4)
                .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        Self {
            total_objects: slot(STATS_OBJECTS_TESTED),
            visible_objects: slot(STATS_OBJECTS_VISIBLE),
            total_meshlets,
            visible_meshlets: slot(STATS_MESHLETS_VISIBLE),
            visible_triangles: slot(STATS_TRIANGLES_VISIBLE),
        }
    }
}

#[derive(Clone, Copy)]
pub struct ReadStatisticsPass {
    stats: BufferHandle,
}

impl ReadStatisticsPass {
    pub fn setup(builder: &mut PassBuilder<'_, '_>, stats: BufferHandle) -> Self {
        builder.read_buffer(stats, Access::HostRead);
        builder.set_side_effect();
        Self { stats }
    }
}

impl<'a> GraphPass<'a> for ReadStatisticsPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.readback(
            resources.buffer(self.stats),
            0,
            (STATS_SLOT_COUNT * 4) as u64,
            STATISTICS_READBACK_TAG,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_decode_by_slot() {
        let counters: [u32; STATS_SLOT_COUNT] = [5, 3, 9, 4, 120, 0, 0, 0];
        let stats = FrameStatistics::from_counters(bytemuck::cast_slice(&counters), 12);
        assert_eq!(
            stats,
            FrameStatistics {
                total_objects: 5,
                visible_objects: 3,
                total_meshlets: 12,
                visible_meshlets: 4,
                visible_triangles: 120,
            }
        );
    }

    #[test]
    fn short_payloads_read_as_zero() {
        let stats = FrameStatistics::from_counters(&[1, 0, 0, 0], 2);
        assert_eq!(stats.total_objects, 1);
        assert_eq!(stats.visible_triangles, 0);
    }
}
