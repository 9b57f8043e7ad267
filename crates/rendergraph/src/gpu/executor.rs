use crate::error::PassError;
use crate::graph::PassNode;
use crate::ids::TextureKey;

use super::bind_groups::PassBindings;
use super::geometry::DrawCall;
use super::pipeline::PassPipeline;
use super::resources::{BufferKey, ResourceManager};
use super::textures::TextureManager;

/// Everything a pass may draw into or read from during one frame.
pub struct FrameTargets<'a> {
    pub canvas_view: &'a wgpu::TextureView,
    pub canvas_size: (u32, u32),
    pub textures: &'a TextureManager,
    pub resources: &'a ResourceManager,
}

/// Records one pass into an encoder.
#[derive(Debug, Default)]
pub struct RenderPassExecutor;

impl RenderPassExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Encodes `pass` and returns the draw call it issued. On error nothing
    /// was recorded and the remaining passes of the frame still run.
    pub fn execute_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassNode,
        pipeline: Option<&PassPipeline>,
        bindings: Option<&PassBindings>,
        targets: &FrameTargets<'_>,
    ) -> Result<DrawCall, PassError> {
        let pipeline = pipeline.ok_or_else(|| PassError::NoPipeline(pass.id().to_string()))?;
        let groups = match bindings {
            Some(bindings) if bindings.groups.len() == pipeline.slots.len() => {
                if let Some(group) = bindings.missing_group() {
                    return Err(PassError::IncompleteBindings {
                        pass: pass.id().to_string(),
                        group,
                    });
                }
                bindings.groups.iter().flatten().collect::<Vec<_>>()
            }
            _ => {
                return Err(PassError::IncompleteBindings {
                    pass: pass.id().to_string(),
                    group: 0,
                })
            }
        };

        let clear = pass.config.clear_color.to_wgpu();
        let ops = wgpu::Operations {
            load: wgpu::LoadOp::Clear(clear),
            store: wgpu::StoreOp::Store,
        };
        let mut attachment_size = None;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = if pass.is_main() {
            attachment_size = Some(targets.canvas_size);
            vec![Some(wgpu::RenderPassColorAttachment {
                view: targets.canvas_view,
                depth_slice: None,
                resolve_target: None,
                ops,
            })]
        } else {
            let mut attachments = Vec::new();
            for slot in 0..pass.config.output_textures.len() {
                match targets.textures.texture(TextureKey::new(pass.index, slot)) {
                    Some(texture) => {
                        attachment_size.get_or_insert(texture.size);
                        attachments.push(Some(wgpu::RenderPassColorAttachment {
                            view: &texture.view,
                            depth_slice: None,
                            resolve_target: None,
                            ops,
                        }));
                    }
                    None => tracing::warn!(
                        pass = %pass.id(),
                        slot,
                        "output texture missing; attachment skipped"
                    ),
                }
            }
            attachments
        };
        if color_attachments.is_empty() || color_attachments.len() != pipeline_target_count(pass) {
            return Err(PassError::NoColorAttachments(pass.id().to_string()));
        }

        let depth_stencil_attachment = if pass.config.depth_enabled {
            let depth = targets
                .textures
                .depth()
                .filter(|depth| attachment_size == Some(depth.size))
                .ok_or_else(|| PassError::DepthUnavailable(pass.id().to_string()))?;
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(pass.config.clear_depth),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            })
        } else {
            None
        };

        let vertices = targets.resources.buffer(&BufferKey::QuadVertices);
        let indices = targets.resources.buffer(&BufferKey::QuadIndices);
        let (Some(vertices), Some(indices)) = (vertices, indices) else {
            return Err(PassError::MissingGeometry(pass.id().to_string()));
        };

        let draw = DrawCall::for_geometry(pass.config.geometry.as_ref());
        let label = format!("pass '{}'", pass.id());
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        render_pass.set_pipeline(&pipeline.pipeline);
        render_pass.set_vertex_buffer(0, vertices.slice(..));
        render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
        for (index, group) in groups.into_iter().enumerate() {
            render_pass.set_bind_group(index as u32, group, &[]);
        }
        match draw {
            DrawCall::Indexed {
                index_count,
                instance_count,
            } => render_pass.draw_indexed(0..index_count, 0, 0..instance_count),
            DrawCall::NonIndexed {
                vertex_count,
                instance_count,
            } => render_pass.draw(0..vertex_count, 0..instance_count),
        }
        Ok(draw)
    }
}

/// Color targets the pass pipeline was compiled with.
fn pipeline_target_count(pass: &PassNode) -> usize {
    if pass.is_main() {
        1
    } else {
        pass.config.output_textures.len().max(1)
    }
}
