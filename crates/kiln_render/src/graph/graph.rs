//! Render Graph
//!
//! Per-frame scheduler for the visibility pipeline. A frame is built in three
//! steps:
//!
//! 1. **Setup**: `add_pass` runs each pass's setup closure immediately. The
//!    closure declares resources through a [`PassBuilder`] and returns typed
//!    pass data, which lands in the frame arena.
//! 2. **Compile**: passes that contribute to no side effect and no imported
//!    resource are culled, barriers are placed between conflicting accesses and
//!    transient resources are realized through the [`TransientPool`].
//! 3. **Execute**: every surviving pass records into one linear
//!    [`CommandStream`], which is submitted once.
//!
//! Pass order is registration order; the graph never reorders passes.

use bumpalo::Bump;
use kiln_core::{BufferId, ImageId, KilnError, Result};
use smallvec::SmallVec;

use super::builder::{AccessList, PassBuilder};
use super::context::{PassResources, RenderContext};
use super::resource::{
    Access, BufferHandle, ImageHandle, PassKind, ResourceDesc, ResourceNode,
};
use super::transient_pool::TransientPool;
use crate::command::{Barrier, CommandStream, GpuCommand, PhysicalResource};
use crate::device::{BufferDesc, BufferUsage, ImageDesc, ImageFormat, ImageUsage, ReadbackData, RenderDevice};

/// Execution step of a pass. Implemented by the `Copy` pass-data structs
/// returned from setup closures.
pub trait GraphPass<'a> {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>);
}

struct PassNode<'a> {
    name: &'static str,
    kind: PassKind,
    accesses: AccessList,
    side_effect: bool,
    pass: &'a dyn GraphPass<'a>,
}

pub struct RenderGraph<'a> {
    arena: &'a Bump,
    resources: Vec<ResourceNode>,
    passes: Vec<PassNode<'a>>,
}

impl<'a> RenderGraph<'a> {
    #[must_use]
    pub fn new(arena: &'a Bump) -> Self {
        Self {
            arena,
            resources: Vec::with_capacity(64),
            passes: Vec::with_capacity(32),
        }
    }

    #[must_use]
    pub fn arena(&self) -> &'a Bump {
        self.arena
    }

    /// Brings a persistent buffer into the graph. Writes to imported resources
    /// keep their passes alive.
    pub fn import_buffer(&mut self, label: &'static str, id: BufferId) -> BufferHandle {
        self.resources.push(ResourceNode {
            desc: ResourceDesc::Buffer(BufferDesc {
                label,
                size: 0,
                usage: BufferUsage::empty(),
            }),
            imported: Some(PhysicalResource::Buffer(id)),
        });
        BufferHandle((self.resources.len() - 1) as u32)
    }

    pub fn import_image(&mut self, label: &'static str, id: ImageId) -> ImageHandle {
        self.resources.push(ResourceNode {
            desc: ResourceDesc::Image(ImageDesc::d2(
                label,
                1,
                1,
                ImageFormat::Rgba8Unorm,
                ImageUsage::empty(),
            )),
            imported: Some(PhysicalResource::Image(id)),
        });
        ImageHandle((self.resources.len() - 1) as u32)
    }

    /// Registers a pass. `setup` runs now; its returned data is moved into the
    /// frame arena and executed later if the pass survives culling.
    pub fn add_pass<P, F>(&mut self, name: &'static str, kind: PassKind, setup: F) -> &'a P
    where
        P: GraphPass<'a> + Copy + 'a,
        F: FnOnce(&mut PassBuilder<'_, 'a>) -> P,
    {
        let mut builder = PassBuilder {
            resources: &mut self.resources,
            accesses: AccessList::new(),
            side_effect: false,
            arena: self.arena,
        };
        let data = setup(&mut builder);
        let PassBuilder {
            accesses,
            side_effect,
            ..
        } = builder;

        let data: &'a P = self.arena.alloc(data);
        self.passes.push(PassNode {
            name,
            kind,
            accesses,
            side_effect,
            pass: data,
        });
        data
    }

    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Culls dead passes, places barriers and realizes transient resources.
    pub fn compile<D: RenderDevice + ?Sized>(
        self,
        device: &mut D,
        pool: &mut TransientPool,
    ) -> Result<CompiledGraph<'a>> {
        let Self {
            resources, passes, ..
        } = self;

        // Reverse liveness: a pass lives if it has a side effect or writes
        // something a live pass (or the outside world) depends on.
        let mut alive = vec![false; passes.len()];
        let mut needed = vec![false; resources.len()];
        for (index, pass) in passes.iter().enumerate().rev() {
            let live = pass.side_effect
                || pass.accesses.iter().any(|&(r, access)| {
                    access.is_write()
                        && (needed[r as usize] || resources[r as usize].is_imported())
                });
            if live {
                alive[index] = true;
                for &(r, _) in &pass.accesses {
                    needed[r as usize] = true;
                }
            }
        }

        // Forward barrier placement.
        let mut last_access: Vec<Option<Access>> = vec![None; resources.len()];
        let mut placements: Vec<SmallVec<[(u32, Access, Access); 8]>> = Vec::new();
        let mut culled = Vec::new();
        for (index, pass) in passes.iter().enumerate() {
            if !alive[index] {
                culled.push(pass.name);
                placements.push(SmallVec::new());
                continue;
            }

            let mut barriers = SmallVec::new();
            for &(r, access) in &pass.accesses {
                let node = &resources[r as usize];
                match last_access[r as usize] {
                    Some(prev) => {
                        if prev.is_write() || access.is_write() || prev != access {
                            barriers.push((r, prev, access));
                        }
                    }
                    None if !access.is_write() && !node.is_imported() => {
                        return Err(KilnError::Graph(format!(
                            "pass '{}' reads '{}' before any pass writes it",
                            pass.name,
                            node.desc.label()
                        )));
                    }
                    None => {}
                }
            }
            for &(r, access) in &pass.accesses {
                last_access[r as usize] = Some(access);
            }
            placements.push(barriers);
        }

        // Physical realization.
        let mut physical: Vec<Option<PhysicalResource>> = Vec::with_capacity(resources.len());
        for (index, node) in resources.iter().enumerate() {
            let resource = if let Some(imported) = node.imported {
                Some(imported)
            } else if needed[index] {
                Some(match &node.desc {
                    ResourceDesc::Buffer(desc) => {
                        PhysicalResource::Buffer(pool.acquire_buffer(device, desc)?)
                    }
                    ResourceDesc::Image(desc) => {
                        PhysicalResource::Image(pool.acquire_image(device, desc)?)
                    }
                })
            } else {
                None
            };
            physical.push(resource);
        }

        let mut compiled_passes = Vec::with_capacity(passes.len() - culled.len());
        let mut barrier_count = 0;
        for ((pass, barriers), live) in passes.into_iter().zip(placements).zip(alive) {
            if !live {
                continue;
            }
            let barriers: SmallVec<[Barrier; 8]> = barriers
                .into_iter()
                .filter_map(|(r, before, after)| {
                    physical[r as usize].map(|resource| Barrier {
                        resource,
                        before,
                        after,
                    })
                })
                .collect();
            barrier_count += barriers.len();
            compiled_passes.push(CompiledPass {
                name: pass.name,
                kind: pass.kind,
                barriers,
                pass: pass.pass,
            });
        }

        if !culled.is_empty() {
            log::trace!("RenderGraph: culled passes {culled:?}");
        }
        log::debug!(
            "RenderGraph compiled: {} passes ({} culled), {} barriers",
            compiled_passes.len(),
            culled.len(),
            barrier_count
        );

        let labels = resources
            .iter()
            .zip(&physical)
            .filter_map(|(node, resource)| resource.map(|r| (node.desc.label(), r)))
            .collect();

        Ok(CompiledGraph {
            passes: compiled_passes,
            physical,
            report: FrameReport {
                passes: Vec::new(),
                culled_passes: culled,
                barrier_count,
                transient_bytes: pool.active_bytes(),
                resources: labels,
            },
        })
    }
}

struct CompiledPass<'a> {
    name: &'static str,
    kind: PassKind,
    barriers: SmallVec<[Barrier; 8]>,
    pass: &'a dyn GraphPass<'a>,
}

pub struct CompiledGraph<'a> {
    passes: Vec<CompiledPass<'a>>,
    physical: Vec<Option<PhysicalResource>>,
    report: FrameReport,
}

impl<'a> CompiledGraph<'a> {
    /// Records every pass into one stream and submits it.
    pub fn execute<D: RenderDevice + ?Sized>(self, device: &mut D) -> Result<FrameOutput> {
        let Self {
            passes,
            physical,
            mut report,
        } = self;

        let mut stream = CommandStream::new();
        let resources = PassResources::new(&physical);
        for pass in &passes {
            stream.push(GpuCommand::BeginPass {
                name: pass.name,
                kind: pass.kind,
            });
            for barrier in &pass.barriers {
                stream.push(GpuCommand::Barrier(*barrier));
            }
            let mut ctx = RenderContext::new(&mut stream);
            pass.pass.execute(&mut ctx, &resources);
            stream.push(GpuCommand::EndPass);
            report.passes.push(pass.name);
        }

        let readbacks = device.submit(&stream)?;
        Ok(FrameOutput { report, readbacks })
    }

    #[must_use]
    pub fn report(&self) -> &FrameReport {
        &self.report
    }
}

/// Result of one executed frame graph.
#[derive(Debug, Default)]
pub struct FrameOutput {
    pub report: FrameReport,
    pub readbacks: Vec<ReadbackData>,
}

/// What the last frame did, for tools and tests.
#[derive(Debug, Default, Clone)]
pub struct FrameReport {
    /// Executed passes in submission order.
    pub passes: Vec<&'static str>,
    pub culled_passes: Vec<&'static str>,
    pub barrier_count: usize,
    /// Bytes of transient resources realized for the frame.
    pub transient_bytes: u64,
    /// Every realized resource by label.
    pub resources: Vec<(&'static str, PhysicalResource)>,
}

impl FrameReport {
    #[must_use]
    pub fn executed(&self, pass: &str) -> bool {
        self.passes.iter().any(|p| *p == pass)
    }

    /// First realized buffer with `label`.
    #[must_use]
    pub fn buffer(&self, label: &str) -> Option<BufferId> {
        self.resources.iter().find_map(|(l, r)| match r {
            PhysicalResource::Buffer(id) if *l == label => Some(*id),
            _ => None,
        })
    }

    #[must_use]
    pub fn image(&self, label: &str) -> Option<ImageId> {
        self.resources.iter().find_map(|(l, r)| match r {
            PhysicalResource::Image(id) if *l == label => Some(*id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    #[derive(Clone, Copy)]
    struct ClearPass {
        target: BufferHandle,
    }

    impl<'a> GraphPass<'a> for ClearPass {
        fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
            ctx.clear_buffer(resources.buffer(self.target));
        }
    }

    #[derive(Clone, Copy)]
    struct CopyPass {
        data: &'static [u8],
        target: BufferHandle,
    }

    impl<'a> GraphPass<'a> for CopyPass {
        fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
            ctx.write_buffer(resources.buffer(self.target), 0, self.data);
        }
    }

    fn desc(label: &'static str) -> BufferDesc {
        BufferDesc {
            label,
            size: 16,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        }
    }

    #[test]
    fn culls_passes_nobody_consumes() {
        let arena = Bump::new();
        let mut device = SoftwareDevice::new();
        let mut pool = TransientPool::new();
        let mut graph = RenderGraph::new(&arena);

        graph.add_pass("Orphan", PassKind::Transfer, |b| {
            let target = b.create_buffer(desc("orphan"));
            ClearPass {
                target: b.write_buffer(target, Access::TransferWrite),
            }
        });
        graph.add_pass("Kept", PassKind::Transfer, |b| {
            let target = b.create_buffer(desc("kept"));
            b.set_side_effect();
            ClearPass {
                target: b.write_buffer(target, Access::TransferWrite),
            }
        });

        let compiled = graph.compile(&mut device, &mut pool).unwrap();
        assert_eq!(compiled.report().culled_passes, vec!["Orphan"]);
        assert!(compiled.report().buffer("orphan").is_none());

        let output = compiled.execute(&mut device).unwrap();
        assert_eq!(output.report.passes, vec!["Kept"]);
    }

    #[test]
    fn a_live_writer_keeps_earlier_writers_alive() {
        let arena = Bump::new();
        let mut device = SoftwareDevice::new();
        let mut pool = TransientPool::new();
        let mut graph = RenderGraph::new(&arena);
        let output = device.create_buffer(&desc("output")).unwrap();
        let output = graph.import_buffer("output", output);

        let scratch = graph
            .add_pass("Clear", PassKind::Transfer, |b| {
                let target = b.create_buffer(desc("scratch"));
                ClearPass {
                    target: b.write_buffer(target, Access::TransferWrite),
                }
            })
            .target;
        graph.add_pass("Accumulate", PassKind::Transfer, |b| {
            b.write_buffer(scratch, Access::TransferWrite);
            CopyPass {
                data: &[1, 2, 3, 4],
                target: scratch,
            }
        });
        graph.add_pass("Publish", PassKind::Transfer, |b| {
            b.read_buffer(scratch, Access::ShaderRead);
            CopyPass {
                data: &[9; 4],
                target: b.write_buffer(output, Access::TransferWrite),
            }
        });

        let compiled = graph.compile(&mut device, &mut pool).unwrap();
        assert!(compiled.report().culled_passes.is_empty());
        // write→write on scratch, then write→read on scratch
        assert_eq!(compiled.report().barrier_count, 2);
    }

    #[test]
    fn places_barriers_only_on_conflicts() {
        let arena = Bump::new();
        let mut device = SoftwareDevice::new();
        let mut pool = TransientPool::new();
        let mut graph = RenderGraph::new(&arena);

        let buffer = graph
            .add_pass("Write", PassKind::Transfer, |b| {
                let target = b.create_buffer(desc("shared"));
                ClearPass {
                    target: b.write_buffer(target, Access::TransferWrite),
                }
            })
            .target;
        for name in ["ReadA", "ReadB"] {
            graph.add_pass(name, PassKind::Compute, |b| {
                b.read_buffer(buffer, Access::ShaderRead);
                b.set_side_effect();
                let scratch = b.create_buffer(desc("scratch"));
                ClearPass {
                    target: b.write_buffer(scratch, Access::TransferWrite),
                }
            });
        }

        let output = graph
            .compile(&mut device, &mut pool)
            .unwrap()
            .execute(&mut device)
            .unwrap();
        // one barrier before the first read; read→read needs none
        assert_eq!(output.report.barrier_count, 1);
        assert_eq!(output.report.passes, vec!["Write", "ReadA", "ReadB"]);
    }

    #[test]
    fn reading_an_unwritten_transient_is_an_error() {
        let arena = Bump::new();
        let mut device = SoftwareDevice::new();
        let mut pool = TransientPool::new();
        let mut graph = RenderGraph::new(&arena);

        graph.add_pass("Reader", PassKind::Compute, |b| {
            let target = b.create_buffer(desc("never written"));
            b.read_buffer(target, Access::ShaderRead);
            b.set_side_effect();
            ClearPass { target }
        });

        let result = graph.compile(&mut device, &mut pool);
        assert!(matches!(result, Err(KilnError::Graph(_))));
    }

    #[test]
    fn arena_payloads_reach_the_device() {
        let arena = Bump::new();
        let mut device = SoftwareDevice::new();
        let mut pool = TransientPool::new();
        let mut graph = RenderGraph::new(&arena);
        let target = device.create_buffer(&desc("target")).unwrap();
        let imported = graph.import_buffer("target", target);

        graph.add_pass("Upload", PassKind::Transfer, |b| {
            let data = b.alloc_slice(&[7u32, 8, 9, 10]);
            UploadPass {
                data,
                target: b.write_buffer(imported, Access::TransferWrite),
            }
        });

        graph
            .compile(&mut device, &mut pool)
            .unwrap()
            .execute(&mut device)
            .unwrap();
        assert_eq!(device.read_buffer_as::<u32>(target).unwrap(), vec![7, 8, 9, 10]);
    }

    #[derive(Clone, Copy)]
    struct UploadPass<'a> {
        data: &'a [u8],
        target: BufferHandle,
    }

    impl<'a> GraphPass<'a> for UploadPass<'a> {
        fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
            ctx.write_buffer(resources.buffer(self.target), 0, self.data);
        }
    }
}
