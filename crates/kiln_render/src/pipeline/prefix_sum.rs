//! Exclusive prefix sum over a `u32` buffer: `out[0] = 0`,
//! `out[i] = out[i - 1] + in[i - 1]`.
//!
//! A single workgroup of `PREFIX_SUM_GROUP_SIZE` threads scans the input in
//! chunks and carries the running total between them, so any count works.

use crate::command::{Kernel, PrefixSumParams};
use crate::device::BufferDesc;
use crate::graph::{BufferHandle, GraphPass, PassBuilder, PassResources, RenderContext};

#[derive(Clone, Copy)]
pub struct PrefixSumPass {
    input: BufferHandle,
    output: BufferHandle,
    count: u32,
}

impl PrefixSumPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        label: &'static str,
        input: BufferHandle,
        count: u32,
    ) -> Self {
        builder.read_storage(input);
        let output = builder.create_buffer(BufferDesc::storage::<u32>(label, count));
        builder.write_storage(output);
        Self { input, output, count }
    }

    #[must_use]
    pub fn output(&self) -> BufferHandle {
        self.output
    }
}

impl<'a> GraphPass<'a> for PrefixSumPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.dispatch(
            Kernel::PrefixSum {
                params: PrefixSumParams {
                    count: self.count,
                    _pad: [0; 3],
                },
                input: resources.buffer(self.input),
                output: resources.buffer(self.output),
            },
            [1, 1, 1],
        );
    }
}

/// CPU reference of the scan, used by tests and tools.
#[must_use]
pub fn exclusive_prefix_sum(values: &[u32]) -> Vec<u32> {
    values
        .iter()
        .scan(0u32, |running, &v| {
            let start = *running;
            *running = running.wrapping_add(v);
            Some(start)
        })
        .collect()
}
