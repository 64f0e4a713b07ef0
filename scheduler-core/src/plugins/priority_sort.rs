use std::cmp::Ordering;

use common::PodInfo;

use crate::plugins::{Plugin, QueueSortPlugin};

pub struct PrioritySort;

impl Plugin for PrioritySort {
    fn name(&self) -> &str {
        "PrioritySort"
    }
}

impl QueueSortPlugin for PrioritySort {
    fn less(&self, a: &PodInfo, b: &PodInfo) -> Ordering {
        match b.spec.priority.cmp(&a.spec.priority) {
            Ordering::Equal => a.queued_info.timestamp.cmp(&b.queued_info.timestamp),
            other => other,
        }
    }
}
