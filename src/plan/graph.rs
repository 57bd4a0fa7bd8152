//! 计划依赖图
//!
//! 使用邻接表和入度表：检查缺失依赖、检测环（Kahn 拓扑排序）、求某步骤的传递下游

use std::collections::{HashMap, HashSet, VecDeque};

use crate::plan::types::*;

/// 计划依赖图
pub struct DependencyGraph {
    /// 邻接表：步骤 ID -> 依赖该步骤的步骤列表
    pub adjacency: HashMap<StepId, Vec<StepId>>,
    /// 入度表：步骤 ID -> 依赖数
    pub in_degree: HashMap<StepId, usize>,
    /// 引用了计划中不存在的步骤：(步骤, 缺失的依赖)
    missing: Vec<(StepId, StepId)>,
}

impl DependencyGraph {
    /// 创建依赖图
    pub fn new(plan: &Plan) -> Self {
        let mut adjacency: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut in_degree: HashMap<StepId, usize> = HashMap::new();
        let mut missing = Vec::new();

        for step in plan.steps() {
            in_degree.insert(step.id.clone(), 0);
            adjacency.entry(step.id.clone()).or_default();
        }

        for step in plan.steps() {
            for dep_id in &step.dependencies {
                if !plan.contains(dep_id) {
                    missing.push((step.id.clone(), dep_id.clone()));
                    continue;
                }
                adjacency.entry(dep_id.clone()).or_default().push(step.id.clone());
                *in_degree.entry(step.id.clone()).or_insert(0) += 1;
            }
        }

        Self {
            adjacency,
            in_degree,
            missing,
        }
    }

    pub fn missing_dependencies(&self) -> &[(StepId, StepId)] {
        &self.missing
    }

    /// 处在环上（或被环阻塞）的步骤；无环返回空
    pub fn cyclic_steps(&self) -> Vec<StepId> {
        let mut degree = self.in_degree.clone();
        let mut queue: VecDeque<StepId> = degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();

        while let Some(id) = queue.pop_front() {
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(d) = degree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
        }

        let mut stuck: Vec<StepId> = degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id)
            .collect();
        stuck.sort();
        stuck
    }

    /// 传递地依赖于 id 的所有步骤（不含 id 本身）
    pub fn dependents_of(&self, id: &str) -> HashSet<StepId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&StepId> = VecDeque::new();
        if let Some(direct) = self.adjacency.get(id) {
            queue.extend(direct.iter());
        }
        while let Some(next) = queue.pop_front() {
            if next == id || !seen.insert(next.clone()) {
                continue;
            }
            if let Some(more) = self.adjacency.get(next) {
                queue.extend(more.iter());
            }
        }
        seen
    }
}
