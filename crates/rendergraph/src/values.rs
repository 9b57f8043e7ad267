//! Uniform values and their byte encodings.
//!
//! Two encodings coexist:
//! - [`UniformType::encode`] follows the WGSL uniform layout of a reflected
//!   declaration (component counts are preserved, `mat3x3f` columns are padded
//!   to `vec4`).
//! - [`UniformValue::to_aligned_bytes`] is the loosely typed representation
//!   used for the config-level custom uniform buffers: always a multiple of
//!   four 32-bit lanes.

use std::fmt;

use serde_json::Value;

/// Value written into a uniform buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vector(Vec<f32>),
    Bool(bool),
    /// Column-major matrix components.
    Matrix(Vec<f32>),
}

impl UniformValue {
    /// Interprets a JSON value; anything that is not a number, boolean, flat
    /// numeric array or array of numeric arrays yields `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_f64().map(|v| UniformValue::Scalar(v as f32)),
            Value::Bool(flag) => Some(UniformValue::Bool(*flag)),
            Value::Array(items) => {
                if !items.is_empty() && items.iter().all(Value::is_array) {
                    let mut flat = Vec::new();
                    for column in items {
                        flat.extend(numeric_array(column.as_array()?)?);
                    }
                    Some(UniformValue::Matrix(flat))
                } else {
                    numeric_array(items).map(UniformValue::Vector)
                }
            }
            _ => None,
        }
    }

    /// Flattened float components (booleans become `1.0`/`0.0`).
    pub fn components(&self) -> Vec<f32> {
        match self {
            UniformValue::Scalar(value) => vec![*value],
            UniformValue::Bool(flag) => vec![if *flag { 1.0 } else { 0.0 }],
            UniformValue::Vector(values) | UniformValue::Matrix(values) => values.clone(),
        }
    }

    /// Four-lane aligned representation: scalars occupy lane 0 of a 4-float
    /// block, arrays are zero-padded to the next multiple of four and booleans
    /// become a `u32` flag in lane 0.
    pub fn to_aligned_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Scalar(value) => floats_to_bytes(&[*value, 0.0, 0.0, 0.0]),
            UniformValue::Vector(values) | UniformValue::Matrix(values) => {
                let mut padded = values.clone();
                padded.resize(values.len().div_ceil(4) * 4, 0.0);
                floats_to_bytes(&padded)
            }
            UniformValue::Bool(flag) => {
                let lanes: [u32; 4] = [u32::from(*flag), 0, 0, 0];
                bytemuck::cast_slice(&lanes).to_vec()
            }
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Scalar(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(value: Vec<f32>) -> Self {
        UniformValue::Vector(value)
    }
}

fn numeric_array(items: &[Value]) -> Option<Vec<f32>> {
    items
        .iter()
        .map(|item| item.as_f64().map(|v| v as f32))
        .collect()
}

fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// WGSL type of a uniform declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniformType {
    F32,
    I32,
    U32,
    Bool,
    Vec2f,
    Vec3f,
    Vec4f,
    Mat2x2f,
    Mat3x3f,
    Mat4x4f,
    /// Struct or otherwise unsupported type, kept by name.
    Unknown(String),
}

impl UniformType {
    /// Parses WGSL type text (`vec4f`, `vec4<f32>`, `mat3x3<f32>`, ...). A few
    /// GLSL-flavoured aliases used by config declarations are accepted as well.
    pub fn parse(text: &str) -> Self {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let normalized = match compact.as_str() {
            "vec2<f32>" => "vec2f",
            "vec3<f32>" => "vec3f",
            "vec4<f32>" => "vec4f",
            "mat2x2<f32>" => "mat2x2f",
            "mat3x3<f32>" => "mat3x3f",
            "mat4x4<f32>" => "mat4x4f",
            other => other,
        };
        match normalized {
            "f32" | "float" => UniformType::F32,
            "i32" | "int" => UniformType::I32,
            "u32" | "uint" => UniformType::U32,
            "bool" => UniformType::Bool,
            "vec2f" | "vec2" => UniformType::Vec2f,
            "vec3f" | "vec3" => UniformType::Vec3f,
            "vec4f" | "vec4" => UniformType::Vec4f,
            "mat2x2f" | "mat2" => UniformType::Mat2x2f,
            "mat3x3f" | "mat3" => UniformType::Mat3x3f,
            "mat4x4f" | "mat4" => UniformType::Mat4x4f,
            _ => UniformType::Unknown(compact),
        }
    }

    /// Logical component count; `None` for unknown types.
    pub fn component_count(&self) -> Option<usize> {
        match self {
            UniformType::F32 | UniformType::I32 | UniformType::U32 | UniformType::Bool => Some(1),
            UniformType::Vec2f => Some(2),
            UniformType::Vec3f => Some(3),
            UniformType::Vec4f | UniformType::Mat2x2f => Some(4),
            UniformType::Mat3x3f => Some(9),
            UniformType::Mat4x4f => Some(16),
            UniformType::Unknown(_) => None,
        }
    }

    /// Value used when neither the shader nor the config provides one.
    pub fn zero_default(&self) -> UniformValue {
        match self {
            UniformType::F32 | UniformType::I32 | UniformType::U32 => UniformValue::Scalar(0.0),
            UniformType::Bool => UniformValue::Bool(false),
            UniformType::Vec2f => UniformValue::Vector(vec![0.0; 2]),
            UniformType::Vec3f => UniformValue::Vector(vec![0.0; 3]),
            UniformType::Vec4f => UniformValue::Vector(vec![0.0; 4]),
            UniformType::Mat2x2f => UniformValue::Matrix(identity(2)),
            UniformType::Mat3x3f => UniformValue::Matrix(identity(3)),
            UniformType::Mat4x4f => UniformValue::Matrix(identity(4)),
            UniformType::Unknown(_) => UniformValue::Vector(vec![0.0; 4]),
        }
    }

    /// Encodes `value` with this type's uniform layout.
    pub fn encode(&self, value: &UniformValue) -> Vec<u8> {
        let components = value.components();
        let first = components.first().copied().unwrap_or(0.0);
        match self {
            UniformType::F32 => floats_to_bytes(&[first]),
            UniformType::I32 => bytemuck::bytes_of(&(first.round() as i32)).to_vec(),
            UniformType::U32 => bytemuck::bytes_of(&(first.max(0.0).round() as u32)).to_vec(),
            UniformType::Bool => bytemuck::bytes_of(&u32::from(first != 0.0)).to_vec(),
            UniformType::Vec2f | UniformType::Vec3f | UniformType::Vec4f => {
                let count = self.component_count().unwrap_or(4);
                let mut padded = components;
                padded.resize(count, 0.0);
                floats_to_bytes(&padded)
            }
            UniformType::Mat2x2f => floats_to_bytes(&matrix_columns(&components, 2, 2)),
            UniformType::Mat3x3f => floats_to_bytes(&mat3_padded(&components)),
            UniformType::Mat4x4f => floats_to_bytes(&matrix_columns(&components, 4, 4)),
            UniformType::Unknown(_) => {
                let mut padded = components;
                let len = padded.len().max(1).div_ceil(4) * 4;
                padded.resize(len, 0.0);
                floats_to_bytes(&padded)
            }
        }
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformType::F32 => f.write_str("f32"),
            UniformType::I32 => f.write_str("i32"),
            UniformType::U32 => f.write_str("u32"),
            UniformType::Bool => f.write_str("bool"),
            UniformType::Vec2f => f.write_str("vec2f"),
            UniformType::Vec3f => f.write_str("vec3f"),
            UniformType::Vec4f => f.write_str("vec4f"),
            UniformType::Mat2x2f => f.write_str("mat2x2f"),
            UniformType::Mat3x3f => f.write_str("mat3x3f"),
            UniformType::Mat4x4f => f.write_str("mat4x4f"),
            UniformType::Unknown(name) => f.write_str(name),
        }
    }
}

fn identity(size: usize) -> Vec<f32> {
    let mut values = vec![0.0; size * size];
    for index in 0..size {
        values[index * size + index] = 1.0;
    }
    values
}

/// Fills missing matrix components from the identity matrix.
fn matrix_columns(components: &[f32], columns: usize, rows: usize) -> Vec<f32> {
    let mut values = identity(columns);
    for (slot, value) in values.iter_mut().zip(components.iter()) {
        *slot = *value;
    }
    values.truncate(columns * rows);
    values
}

fn mat3_padded(components: &[f32]) -> Vec<f32> {
    // Already in the padded 3x vec4 layout.
    if components.len() == 12 {
        return components.to_vec();
    }
    let dense = matrix_columns(components, 3, 3);
    let mut padded = Vec::with_capacity(12);
    for column in dense.chunks(3) {
        padded.extend_from_slice(column);
        padded.push(0.0);
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytemuck::cast_slice(bytes).to_vec()
    }

    #[test]
    fn vec4_round_trips_bit_for_bit() {
        let value = UniformValue::Vector(vec![0.1, 0.2, 0.3, 0.4]);
        let encoded = UniformType::Vec4f.encode(&value);
        assert_eq!(encoded.len(), 16);
        let decoded = floats(&encoded);
        for (decoded, expected) in decoded.iter().zip([0.1f32, 0.2, 0.3, 0.4]) {
            assert_eq!(decoded.to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn vectors_pad_to_component_count() {
        let encoded = UniformType::Vec3f.encode(&UniformValue::Vector(vec![1.0]));
        assert_eq!(floats(&encoded), vec![1.0, 0.0, 0.0]);
        let scalar = UniformType::Vec2f.encode(&UniformValue::Scalar(2.5));
        assert_eq!(floats(&scalar), vec![2.5, 0.0]);
    }

    #[test]
    fn mat3_columns_are_padded() {
        let value = UniformValue::Matrix((1..=9).map(|v| v as f32).collect());
        let encoded = floats(&UniformType::Mat3x3f.encode(&value));
        assert_eq!(
            encoded,
            vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
    }

    #[test]
    fn matrix_zero_default_is_identity() {
        let UniformValue::Matrix(values) = UniformType::Mat4x4f.zero_default() else {
            panic!("expected matrix default");
        };
        assert_eq!(values.len(), 16);
        assert_eq!(values[0], 1.0);
        assert_eq!(values[5], 1.0);
        assert_eq!(values[1], 0.0);
    }

    #[test]
    fn unknown_types_fall_back_to_four_float_alignment() {
        let ty = UniformType::parse("Params");
        assert!(matches!(ty, UniformType::Unknown(ref name) if name == "Params"));
        let encoded = ty.encode(&UniformValue::Vector(vec![1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(encoded.len(), 32);
        assert_eq!(ty.encode(&UniformValue::Scalar(1.0)).len(), 16);
    }

    #[test]
    fn parse_normalizes_generic_spellings() {
        assert_eq!(UniformType::parse("vec4<f32>"), UniformType::Vec4f);
        assert_eq!(UniformType::parse("mat4x4< f32 >"), UniformType::Mat4x4f);
        assert_eq!(UniformType::parse("float"), UniformType::F32);
        assert_eq!(UniformType::Vec3f.component_count(), Some(3));
        assert_eq!(UniformType::Mat3x3f.component_count(), Some(9));
    }

    #[test]
    fn bool_and_integer_encodings() {
        assert_eq!(
            UniformType::Bool.encode(&UniformValue::Bool(true)),
            1u32.to_le_bytes().to_vec()
        );
        assert_eq!(
            UniformType::I32.encode(&UniformValue::Scalar(-2.0)),
            (-2i32).to_le_bytes().to_vec()
        );
    }

    #[test]
    fn aligned_bytes_follow_typed_array_rules() {
        assert_eq!(
            floats(&UniformValue::Scalar(3.0).to_aligned_bytes()),
            vec![3.0, 0.0, 0.0, 0.0]
        );
        let five = UniformValue::Vector(vec![1.0; 5]).to_aligned_bytes();
        assert_eq!(five.len(), 8 * 4);
        let flag = UniformValue::Bool(true).to_aligned_bytes();
        let lanes: Vec<u32> = bytemuck::cast_slice(&flag).to_vec();
        assert_eq!(lanes, vec![1, 0, 0, 0]);
    }

    #[test]
    fn json_values_map_to_variants() {
        assert_eq!(
            UniformValue::from_json(&json!(0.5)),
            Some(UniformValue::Scalar(0.5))
        );
        assert_eq!(
            UniformValue::from_json(&json!([[1, 0], [0, 1]])),
            Some(UniformValue::Matrix(vec![1.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(UniformValue::from_json(&json!("red")), None);
        assert_eq!(UniformValue::from_json(&json!([1, "x"])), None);
    }
}
