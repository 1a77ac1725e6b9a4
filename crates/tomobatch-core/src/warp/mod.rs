//! Readers for the metadata warp leaves behind: mdoc acquisition records
//! and the per-frame XML descriptors next to each subframe movie.

pub mod frame_xml;
pub mod mdoc;

pub use frame_xml::FrameDescriptor;
pub use mdoc::{windows_basename, Mdoc, MdocSection};
