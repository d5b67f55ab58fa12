//! # shapeindex-types
//!
//! Plain data types shared by every layer of the shapeindex spatial index:
//!
//! - **Bounding boxes**: `BoundingBox`, an axis-aligned box of 1 to 3 dimensions
//! - **Shape descriptors**: `Descriptor`, the generic structured term a shape is
//!   described with before it is interpreted into a geometry
//!
//! All types are serializable with Serde.
//!
//! ## Examples
//!
//! ```rust
//! use shapeindex_types::bbox::BoundingBox;
//! use shapeindex_types::descriptor::Descriptor;
//!
//! let shape: Descriptor = "box(point(0, 0), point(1, 1))".parse().unwrap();
//! assert_eq!(shape.tag(), Some("box"));
//!
//! let bbox = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
//! assert_eq!(bbox.to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
//! ```

pub mod bbox;
pub mod descriptor;
