//! 三维 mesh：无回绕，L1 距离，XYZ 维序路由

use super::grid::Grid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mesh3D {
    dims: [usize; 3],
}

impl Mesh3D {
    /// 各维度必须至少为 1
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self {
            dims: [x.max(1), y.max(1), z.max(1)],
        }
    }
}

impl Grid for Mesh3D {
    fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn wraps(&self) -> bool {
        false
    }

    fn axis_delta(&self, _axis: usize, a: usize, b: usize) -> usize {
        a.abs_diff(b)
    }

    fn axis_positions(&self, axis: usize, c: usize, delta: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(2);
        if c >= delta {
            out.push(c - delta);
        }
        if delta > 0 && c + delta < self.dims[axis] {
            out.push(c + delta);
        }
        out
    }

    fn max_axis_delta(&self, axis: usize) -> usize {
        self.dims[axis] - 1
    }

    fn axis_steps(&self, _axis: usize, a: usize, b: usize) -> Vec<(usize, usize)> {
        if b >= a {
            (a..b).map(|x| (x, x + 1)).collect()
        } else {
            (b..a).rev().map(|x| (x, x)).collect()
        }
    }

    /// 3xyz - xy - xz - yz
    fn num_links(&self) -> usize {
        let [x, y, z] = self.dims;
        3 * x * y * z - x * y - x * z - y * z
    }
}
