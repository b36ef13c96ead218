//! 三维 torus：各维度回绕，单轴距离取正反两个方向中较短者

use super::grid::Grid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torus3D {
    dims: [usize; 3],
}

impl Torus3D {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self {
            dims: [x.max(1), y.max(1), z.max(1)],
        }
    }

    fn forward(&self, axis: usize, a: usize, b: usize) -> usize {
        let n = self.dims[axis];
        (b + n - a) % n
    }
}

impl Grid for Torus3D {
    fn dims(&self) -> [usize; 3] {
        self.dims
    }

    fn wraps(&self) -> bool {
        true
    }

    fn axis_delta(&self, axis: usize, a: usize, b: usize) -> usize {
        let fwd = self.forward(axis, a, b);
        fwd.min(self.dims[axis] - fwd)
    }

    fn axis_positions(&self, axis: usize, c: usize, delta: usize) -> Vec<usize> {
        let n = self.dims[axis];
        if delta > n / 2 {
            return Vec::new();
        }
        let up = (c + delta) % n;
        let down = (c + n - delta) % n;
        if up == down { vec![up] } else { vec![up, down] }
    }

    fn max_axis_delta(&self, axis: usize) -> usize {
        self.dims[axis] / 2
    }

    fn axis_steps(&self, axis: usize, a: usize, b: usize) -> Vec<(usize, usize)> {
        let n = self.dims[axis];
        let fwd = self.forward(axis, a, b);
        let bwd = (n - fwd) % n;
        let go_forward = fwd < bwd || (fwd == bwd && b > a);
        let mut cur = a;
        let mut steps = Vec::new();
        if go_forward {
            for _ in 0..fwd {
                let next = (cur + 1) % n;
                steps.push((cur, next));
                cur = next;
            }
        } else {
            for _ in 0..bwd {
                let next = (cur + n - 1) % n;
                steps.push((next, next));
                cur = next;
            }
        }
        steps
    }

    /// 长度为 2 的维度只有一条链路，长度为 1 的维度没有链路
    fn num_links(&self) -> usize {
        let total: usize = self.dims.iter().product();
        self.dims
            .iter()
            .map(|&d| match d {
                1 => 0,
                2 => total / 2,
                _ => total,
            })
            .sum()
    }
}
