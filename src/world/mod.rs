mod bsp;
mod builder;
mod camera;
pub mod demo;
mod geometry;
mod pvs;
mod texture;

pub use geometry::{
    BspChild, Contents, Edge, EdgeId, Leaf, LeafId, Level, Node, NodeId, Plane, PlaneId, Portal,
    PortalId, PortalTransform, SOLID_LEAF, Submodel, SubmodelId, Surface, SurfaceEdge,
    SurfaceFlags, SurfaceId, TexInfo, TexInfoId, Vertex, VertexId,
};

pub use builder::{LevelBuilder, LevelError};

pub use camera::Camera;

pub use pvs::{LeafVisibleSet, PvsCache, compress_row, decompress_row, row_bytes};

pub use texture::{
    Colormap, MIP_LEVELS, MipView, NO_TEXTURE, Palette, SHADE_LEVELS, Texture, TextureBank,
    TextureError, TextureId, light_to_shade,
};
