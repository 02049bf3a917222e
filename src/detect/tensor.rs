use anyhow::{anyhow, Result};

/// Element storage of a [`Tensor`].
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

/// Dense row-major tensor exchanged with inference backends.
///
/// Inputs are `u8` NHWC; outputs are `f32` in whatever layout the model defines.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        check_len(&shape, data.len())?;
        Ok(Self {
            shape,
            data: TensorData::U8(data),
        })
    }

    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        check_len(&shape, data.len())?;
        Ok(Self {
            shape,
            data: TensorData::F32(data),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::U8(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::U8(v) => Some(v),
            TensorData::F32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::U8(_) => None,
        }
    }
}

fn check_len(shape: &[usize], len: usize) -> Result<()> {
    let expected = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))?;
    if expected != len {
        return Err(anyhow!(
            "tensor shape {:?} needs {} elements, got {}",
            shape,
            expected,
            len
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        assert!(Tensor::from_f32(vec![1, 2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::from_u8(vec![2, 2], vec![0; 4]).is_ok());
    }
}
