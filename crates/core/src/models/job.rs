use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// 作业图中的节点，引用一个子任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNode {
    pub id: i64,
    /// 所属作业任务（kind = "job"）
    pub job_task_id: i64,
    pub task_id: i64,
}

/// 父节点完成后子节点才能运行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: i64,
    pub job_task_id: i64,
    pub parent_node_id: i64,
    pub child_node_id: i64,
}

/// 没有任何入边的节点
pub fn root_nodes<'a>(nodes: &'a [JobNode], deps: &[Dependency]) -> Vec<&'a JobNode> {
    nodes
        .iter()
        .filter(|node| !deps.iter().any(|d| d.child_node_id == node.id))
        .collect()
}

/// 拓扑排序后仍未就绪的节点 id（升序），非空即依赖图中存在环
///
/// 根节点存在时环也可能藏在下游，只检查根节点不够。
pub fn unreachable_nodes(nodes: &[JobNode], deps: &[Dependency]) -> Vec<i64> {
    let mut indegree: HashMap<i64, usize> = nodes.iter().map(|node| (node.id, 0)).collect();
    for dep in deps {
        if let Some(count) = indegree.get_mut(&dep.child_node_id) {
            *count += 1;
        }
    }

    let mut ready: VecDeque<i64> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    while let Some(id) = ready.pop_front() {
        for dep in deps.iter().filter(|d| d.parent_node_id == id) {
            if let Some(count) = indegree.get_mut(&dep.child_node_id) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dep.child_node_id);
                }
            }
        }
    }

    let mut blocked: Vec<i64> = indegree
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(id, _)| id)
        .collect();
    blocked.sort_unstable();
    blocked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> JobNode {
        JobNode {
            id,
            job_task_id: 1,
            task_id: 100 + id,
        }
    }

    fn edge(parent: i64, child: i64) -> Dependency {
        Dependency {
            id: 0,
            job_task_id: 1,
            parent_node_id: parent,
            child_node_id: child,
        }
    }

    #[test]
    fn test_root_nodes_of_diamond() {
        let nodes = vec![node(1), node(2), node(3), node(4)];
        let deps = vec![edge(1, 2), edge(1, 3), edge(2, 4), edge(3, 4)];
        let roots = root_nodes(&nodes, &deps);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, 1);
    }

    #[test]
    fn test_all_nodes_are_roots_without_edges() {
        let nodes = vec![node(1), node(2)];
        assert_eq!(root_nodes(&nodes, &[]).len(), 2);
    }

    #[test]
    fn test_diamond_has_no_unreachable_nodes() {
        let nodes = vec![node(1), node(2), node(3), node(4)];
        let deps = vec![edge(1, 2), edge(1, 3), edge(2, 4), edge(3, 4)];
        assert!(unreachable_nodes(&nodes, &deps).is_empty());
    }

    #[test]
    fn test_cycle_behind_root_is_unreachable() {
        let nodes = vec![node(1), node(2), node(3)];
        let deps = vec![edge(1, 2), edge(2, 3), edge(3, 2)];
        assert_eq!(root_nodes(&nodes, &deps).len(), 1);
        assert_eq!(unreachable_nodes(&nodes, &deps), vec![2, 3]);
    }

    #[test]
    fn test_full_cycle_leaves_every_node_unreachable() {
        let nodes = vec![node(1), node(2)];
        let deps = vec![edge(1, 2), edge(2, 1)];
        assert!(root_nodes(&nodes, &deps).is_empty());
        assert_eq!(unreachable_nodes(&nodes, &deps), vec![1, 2]);
    }
}
