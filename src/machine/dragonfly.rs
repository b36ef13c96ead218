//! Dragonfly 拓扑
//!
//! 路由器分组；组内全互连（all_to_all），组间每对组恰好一条全局（光）链路。
//! 组数 = routers_per_group * opticals_per_router + 1。
//!
//! 链路编号：先是每个节点到其路由器的链路（编号 = 节点下标），
//! 然后是组内链路，最后是全局链路。

use super::id::{LinkId, NodeId};
use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};

/// 组间全局链路的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalTopology {
    Absolute,
    Circulant,
    Relative,
}

impl GlobalTopology {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "absolute" => Some(Self::Absolute),
            "circulant" => Some(Self::Circulant),
            "relative" => Some(Self::Relative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DragonflyOpts {
    pub routers_per_group: usize,
    pub ports_per_router: usize,
    pub opticals_per_router: usize,
    pub nodes_per_router: usize,
    pub global: GlobalTopology,
}

impl Default for DragonflyOpts {
    fn default() -> Self {
        Self {
            routers_per_group: 4,
            ports_per_router: 7,
            opticals_per_router: 1,
            nodes_per_router: 2,
            global: GlobalTopology::Absolute,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dragonfly {
    opts: DragonflyOpts,
    num_groups: usize,
    /// router -> (目标 router -> 链路)
    router_links: Vec<HashMap<usize, LinkId>>,
    /// 路由器间最短跳数
    hops: Vec<Vec<usize>>,
    num_links: usize,
}

impl Dragonfly {
    pub fn new(opts: DragonflyOpts) -> Result<Self> {
        let a = opts.routers_per_group;
        let h = opts.opticals_per_router;
        if a == 0 || opts.nodes_per_router == 0 {
            return Err(Error::config(
                "dragonfly needs at least one router per group and one node per router",
            ));
        }
        let needed = opts.nodes_per_router + (a - 1) + h;
        if opts.ports_per_router < needed {
            return Err(Error::config(format!(
                "dragonfly router needs {needed} ports (nodes + local + optical) but has {}",
                opts.ports_per_router
            )));
        }
        let num_groups = a * h + 1;
        let num_routers = a * num_groups;
        let num_nodes = num_routers * opts.nodes_per_router;

        let mut router_links = vec![HashMap::new(); num_routers];
        let mut next_link = num_nodes;
        let mut connect = |r0: usize, r1: usize, links: &mut Vec<HashMap<usize, LinkId>>| {
            let id = LinkId(next_link);
            next_link += 1;
            links[r0].insert(r1, id);
            links[r1].insert(r0, id);
        };

        for g in 0..num_groups {
            for i in 0..a {
                for j in (i + 1)..a {
                    connect(g * a + i, g * a + j, &mut router_links);
                }
            }
        }

        let mut df = Self {
            opts,
            num_groups,
            router_links: Vec::new(),
            hops: Vec::new(),
            num_links: 0,
        };
        for g in 0..num_groups {
            for t in (g + 1)..num_groups {
                let rg = df.gateway(g, t);
                let rt = df.gateway(t, g);
                connect(rg, rt, &mut router_links);
            }
        }
        df.router_links = router_links;
        df.num_links = next_link;
        df.hops = df.all_pairs_hops();
        Ok(df)
    }

    pub fn opts(&self) -> &DragonflyOpts {
        &self.opts
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_routers(&self) -> usize {
        self.num_groups * self.opts.routers_per_group
    }

    pub fn num_nodes(&self) -> usize {
        self.num_routers() * self.opts.nodes_per_router
    }

    pub fn num_links(&self) -> usize {
        self.num_links
    }

    pub fn router_of(&self, node: NodeId) -> usize {
        node.0 / self.opts.nodes_per_router
    }

    pub fn group_of_router(&self, router: usize) -> usize {
        router / self.opts.routers_per_group
    }

    pub fn group_of(&self, node: NodeId) -> usize {
        self.group_of_router(self.router_of(node))
    }

    /// 某路由器下挂的节点
    pub fn nodes_of_router(&self, router: usize) -> impl Iterator<Item = NodeId> {
        let n = self.opts.nodes_per_router;
        (router * n..(router + 1) * n).map(NodeId)
    }

    /// 某组内的路由器
    pub fn routers_of_group(&self, group: usize) -> impl Iterator<Item = usize> {
        let a = self.opts.routers_per_group;
        group * a..(group + 1) * a
    }

    /// 组 `g` 上通往组 `t` 的全局端口序号
    fn global_port(&self, g: usize, t: usize) -> usize {
        let n = self.num_groups;
        match self.opts.global {
            GlobalTopology::Absolute => {
                if t < g {
                    t
                } else {
                    t - 1
                }
            }
            GlobalTopology::Relative => (t + n - g - 1) % n,
            GlobalTopology::Circulant => {
                let off = (t + n - g) % n;
                let back = n - off;
                if 2 * off == n {
                    n - 2
                } else if off < back {
                    2 * (off - 1)
                } else {
                    2 * (back - 1) + 1
                }
            }
        }
    }

    /// 组 `g` 中持有通往组 `t` 全局链路的路由器
    pub fn gateway(&self, g: usize, t: usize) -> usize {
        g * self.opts.routers_per_group + self.global_port(g, t) / self.opts.opticals_per_router
    }

    fn all_pairs_hops(&self) -> Vec<Vec<usize>> {
        let n = self.num_routers();
        let mut hops = vec![vec![usize::MAX; n]; n];
        let mut q = VecDeque::new();
        for (src, row) in hops.iter_mut().enumerate() {
            row[src] = 0;
            q.clear();
            q.push_back(src);
            while let Some(r) = q.pop_front() {
                let dr = row[r];
                for &nb in self.router_links[r].keys() {
                    if row[nb] == usize::MAX {
                        row[nb] = dr + 1;
                        q.push_back(nb);
                    }
                }
            }
        }
        hops
    }

    /// 节点跳数：同节点为 0，否则为路由器跳数加上两端的节点链路
    pub fn distance(&self, a: NodeId, b: NodeId) -> usize {
        if a == b {
            return 0;
        }
        self.hops[self.router_of(a)][self.router_of(b)] + 2
    }

    pub fn diameter(&self) -> usize {
        self.hops
            .iter()
            .flat_map(|row| row.iter().copied())
            .max()
            .unwrap_or(0)
            + 2
    }

    fn router_link(&self, r0: usize, r1: usize) -> Option<LinkId> {
        self.router_links[r0].get(&r1).copied()
    }

    /// 默认路由：本地 → 全局 → 本地
    pub fn route(&self, a: NodeId, b: NodeId) -> Vec<LinkId> {
        if a == b {
            return Vec::new();
        }
        let (ra, rb) = (self.router_of(a), self.router_of(b));
        let mut routers = vec![ra];
        let (ga, gb) = (self.group_of_router(ra), self.group_of_router(rb));
        if ga != gb {
            let out = self.gateway(ga, gb);
            let inb = self.gateway(gb, ga);
            if out != ra {
                routers.push(out);
            }
            routers.push(inb);
        }
        if routers.last() != Some(&rb) {
            routers.push(rb);
        }

        let mut links = vec![LinkId(a.0)];
        links.extend(
            routers
                .windows(2)
                .filter_map(|w| self.router_link(w[0], w[1])),
        );
        links.push(LinkId(b.0));
        links
    }
}
