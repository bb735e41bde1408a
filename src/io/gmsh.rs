//! Gmsh `.msh` reader and writer.
//!
//! # Supported format
//! - ASCII `.msh` version **2.2**.
//! - Element types: 15 (point), 1 (line), 2 (triangle), 3 (quad), 4 (tet),
//!   5 (hex).
//!
//! # Limitations
//! - Binary files are not supported.
//! - `.msh` v4.x (block-based) is not supported.
//! - Higher-order elements are not supported.
//! - Only the first element tag (the physical group) is used; it becomes the
//!   classification tag of the entity.

use crate::io::MeshFileReader;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::entity::EntityDim;
use std::io::{Read, Write};

/// One element record of a `.msh` file.
#[derive(Clone, Debug, PartialEq)]
pub struct GmshElement {
    pub id: u64,
    pub kind: u32,
    /// Physical group, 0 when the element carries no tags.
    pub physical: i32,
    pub nodes: Vec<u64>,
}

impl GmshElement {
    /// Topological dimension of the element.
    pub fn dim(&self) -> usize {
        GmshReader::element_dim(self.kind).unwrap_or(0)
    }
}

/// Contents of a `.msh` file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GmshMesh {
    /// `(node tag, xyz)` in file order.
    pub nodes: Vec<(u64, [f64; 3])>,
    pub elements: Vec<GmshElement>,
}

/// Gmsh `.msh` reader for ASCII v2.2 meshes.
#[derive(Debug, Default, Clone)]
pub struct GmshReader;

impl GmshReader {
    fn parse_version(line: &str) -> Result<&str, MeshAdaptError> {
        let mut parts = line.split_whitespace();
        let version = parts
            .next()
            .ok_or_else(|| MeshAdaptError::MeshIoParse("missing mesh format version".into()))?;
        let file_type = parts
            .next()
            .ok_or_else(|| MeshAdaptError::MeshIoParse("missing mesh format type".into()))?;
        if file_type != "0" {
            return Err(MeshAdaptError::MeshIoParse(
                "binary .msh files are not supported".into(),
            ));
        }
        Ok(version)
    }

    fn element_node_count(elem_type: u32) -> Option<usize> {
        match elem_type {
            1 => Some(2),  // line
            2 => Some(3),  // triangle
            3 => Some(4),  // quad
            4 => Some(4),  // tet
            5 => Some(8),  // hex
            15 => Some(1), // point
            _ => None,
        }
    }

    fn element_dim(elem_type: u32) -> Option<usize> {
        match elem_type {
            15 => Some(0),
            1 => Some(1),
            2 | 3 => Some(2),
            4 | 5 => Some(3),
            _ => None,
        }
    }

    fn parse<T: std::str::FromStr>(raw: Option<&str>, what: &str) -> Result<T, MeshAdaptError> {
        let raw = raw.ok_or_else(|| MeshAdaptError::MeshIoParse(format!("missing {what}")))?;
        raw.parse::<T>()
            .map_err(|_| MeshAdaptError::MeshIoParse(format!("invalid {what}: {raw}")))
    }

    fn expect_end<'a>(lines: &mut impl Iterator<Item = &'a str>, end: &str) -> Result<(), MeshAdaptError> {
        match lines.next() {
            Some(line) if line.trim() == end => Ok(()),
            _ => Err(MeshAdaptError::MeshIoParse(format!("missing {end}"))),
        }
    }
}

impl MeshFileReader for GmshReader {
    type Output = GmshMesh;

    fn read<R: Read>(&self, mut reader: R) -> Result<GmshMesh, MeshAdaptError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        let mut lines = contents.lines();

        let mut version: Option<String> = None;
        let mut mesh = GmshMesh::default();

        while let Some(line) = lines.next() {
            match line.trim() {
                "$MeshFormat" => {
                    let format_line = lines
                        .next()
                        .ok_or_else(|| MeshAdaptError::MeshIoParse("missing MeshFormat".into()))?;
                    version = Some(Self::parse_version(format_line)?.to_string());
                    Self::expect_end(&mut lines, "$EndMeshFormat")?;
                }
                "$Nodes" => {
                    let node_count: usize = Self::parse(lines.next().map(str::trim), "node count")?;
                    for _ in 0..node_count {
                        let node_line = lines.next().ok_or_else(|| {
                            MeshAdaptError::MeshIoParse("unexpected end of node list".into())
                        })?;
                        let mut parts = node_line.split_whitespace();
                        let id: u64 = Self::parse(parts.next(), "node id")?;
                        let x: f64 = Self::parse(parts.next(), "x coordinate")?;
                        let y: f64 = Self::parse(parts.next(), "y coordinate")?;
                        let z: f64 = Self::parse(parts.next(), "z coordinate")?;
                        mesh.nodes.push((id, [x, y, z]));
                    }
                    Self::expect_end(&mut lines, "$EndNodes")?;
                }
                "$Elements" => {
                    let elem_count: usize = Self::parse(lines.next().map(str::trim), "element count")?;
                    for _ in 0..elem_count {
                        let elem_line = lines.next().ok_or_else(|| {
                            MeshAdaptError::MeshIoParse("unexpected end of element list".into())
                        })?;
                        let mut parts = elem_line.split_whitespace();
                        let id: u64 = Self::parse(parts.next(), "element id")?;
                        let kind: u32 = Self::parse(parts.next(), "element type")?;
                        let node_count = Self::element_node_count(kind).ok_or_else(|| {
                            MeshAdaptError::MeshIoParse(format!("unsupported element type: {kind}"))
                        })?;
                        let num_tags: usize = Self::parse(parts.next(), "element tag count")?;
                        let mut physical = 0;
                        for t in 0..num_tags {
                            let tag: i32 = Self::parse(parts.next(), "element tag")?;
                            if t == 0 {
                                physical = tag;
                            }
                        }
                        let nodes = (0..node_count)
                            .map(|_| Self::parse::<u64>(parts.next(), "element node id"))
                            .collect::<Result<Vec<_>, _>>()?;
                        mesh.elements.push(GmshElement {
                            id,
                            kind,
                            physical,
                            nodes,
                        });
                    }
                    Self::expect_end(&mut lines, "$EndElements")?;
                }
                _ => {
                    // ignore other sections
                }
            }
        }

        let version = version.unwrap_or_else(|| "2.2".to_string());
        if version != "2.2" {
            return Err(MeshAdaptError::MeshIoParse(format!(
                "unsupported gmsh version: {version}"
            )));
        }
        Ok(mesh)
    }
}

/// Writes one rank's mesh as ASCII v2.2.
#[derive(Debug, Default, Clone)]
pub struct GmshWriter;

impl GmshWriter {
    /// Write `mesh` with `node_tags[v]` as the tag of local vertex `v`.
    ///
    /// Cells carry their classification tag; boundaries and vertices classified
    /// on lower-dimensional model entities are written as boundary elements and
    /// points so that reading the file back restores the classification.
    pub fn write<W: Write>(
        &self,
        mut writer: W,
        mesh: &DistributedMesh,
        node_tags: &[u64],
    ) -> Result<(), MeshAdaptError> {
        let n_vertices = mesh.count(EntityDim::Vertex);
        if node_tags.len() != n_vertices {
            return Err(MeshAdaptError::ArrayLengthMismatch {
                array: "node_tags",
                expected: n_vertices,
                found: node_tags.len(),
            });
        }
        writeln!(writer, "$MeshFormat\n2.2 0 8\n$EndMeshFormat")?;
        writeln!(writer, "$Nodes\n{n_vertices}")?;
        for (v, xyz) in mesh.coordinates().iter().enumerate() {
            writeln!(writer, "{} {} {} {}", node_tags[v], xyz[0], xyz[1], xyz[2])?;
        }
        writeln!(writer, "$EndNodes")?;

        let mesh_dim = mesh.dim();
        let mut records: Vec<(u32, i32, Vec<u64>)> = Vec::new();
        for v in 0..n_vertices {
            let class = mesh.classification(EntityDim::Vertex, v);
            if class.dim == 0 {
                records.push((15, class.tag, vec![node_tags[v]]));
            }
        }
        let boundary_kind = match mesh_dim {
            2 => 1,
            _ => match mesh.cell_type().boundary_vertex_count() {
                3 => 2,
                _ => 3,
            },
        };
        let boundary_dim = mesh.boundary_dim();
        for b in 0..mesh.count(boundary_dim) {
            let class = mesh.classification(boundary_dim, b);
            if class.is_boundary(mesh_dim) {
                let nodes = mesh.vertices(boundary_dim, b).iter().map(|&v| node_tags[v]).collect();
                records.push((boundary_kind, class.tag, nodes));
            }
        }
        let element_dim = mesh.element_dim();
        for e in 0..mesh.count(element_dim) {
            let class = mesh.classification(element_dim, e);
            let nodes = mesh.vertices(element_dim, e).iter().map(|&v| node_tags[v]).collect();
            records.push((mesh.cell_type().gmsh_code(), class.tag, nodes));
        }

        writeln!(writer, "$Elements\n{}", records.len())?;
        for (i, (kind, tag, nodes)) in records.iter().enumerate() {
            write!(writer, "{} {kind} 2 {tag} {tag}", i + 1)?;
            for n in nodes {
                write!(writer, " {n}")?;
            }
            writeln!(writer)?;
        }
        writeln!(writer, "$EndElements")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "$MeshFormat
2.2 0 8
$EndMeshFormat
$Nodes
4
1 0 0 0
2 1 0 0
3 1 1 0
4 0 1 0
$EndNodes
$Elements
3
1 1 2 7 1 1 2
2 2 2 3 1 1 2 3
3 2 0 1 3 4
$EndElements
";

    #[test]
    fn reads_nodes_elements_and_physical_tags() {
        let mesh = GmshReader.read(SQUARE.as_bytes()).unwrap();
        assert_eq!(mesh.nodes.len(), 4);
        assert_eq!(mesh.nodes[2], (3, [1.0, 1.0, 0.0]));
        assert_eq!(mesh.elements.len(), 3);
        assert_eq!(mesh.elements[0].physical, 7);
        assert_eq!(mesh.elements[0].dim(), 1);
        assert_eq!(mesh.elements[2].physical, 0);
        assert_eq!(mesh.elements[2].nodes, vec![1, 3, 4]);
    }

    #[test]
    fn rejects_binary_and_truncated_files() {
        let binary = "$MeshFormat\n2.2 1 8\n$EndMeshFormat\n";
        assert!(matches!(
            GmshReader.read(binary.as_bytes()),
            Err(MeshAdaptError::MeshIoParse(_))
        ));
        let truncated = "$Nodes\n2\n1 0 0 0\n";
        assert!(GmshReader.read(truncated.as_bytes()).is_err());
        let bad_type = "$Elements\n1\n1 9 0 1 2 3 4 5 6\n$EndElements\n";
        assert!(GmshReader.read(bad_type.as_bytes()).is_err());
    }
}
