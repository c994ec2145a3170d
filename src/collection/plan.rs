use crate::collection::types::{Collection, Folder, KeyValue, RequestDefinition};

/// 执行计划中的一项：请求及其祖先文件夹（由外到内）
#[derive(Debug, Clone)]
pub struct PlannedRequest<'a> {
    /// 在遍历顺序中的位置（从 0 开始）
    pub index: usize,
    pub request: &'a RequestDefinition,
    pub ancestors: Vec<&'a Folder>,
}

impl<'a> PlannedRequest<'a> {
    /// 文件夹变量，外层在前
    pub fn folder_variables(&self) -> Vec<&'a [KeyValue]> {
        self.ancestors
            .iter()
            .map(|f| f.variables.as_slice())
            .collect()
    }

    /// 文件夹路径，如 "users/admin"
    pub fn folder_path(&self) -> String {
        self.ancestors
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Collection {
    /// 按遍历顺序展开请求：先根级请求，再深度优先遍历文件夹
    pub fn plan(&self) -> Vec<PlannedRequest<'_>> {
        let mut planned = Vec::new();
        for request in &self.requests {
            planned.push(PlannedRequest {
                index: planned.len(),
                request,
                ancestors: Vec::new(),
            });
        }

        let mut trail = Vec::new();
        for folder in &self.folders {
            walk_folder(folder, &mut trail, &mut planned);
        }
        planned
    }

    /// 按 id 查找请求
    pub fn find_request(&self, id: &str) -> Option<&RequestDefinition> {
        self.plan()
            .into_iter()
            .map(|p| p.request)
            .find(|r| r.id == id)
    }
}

fn walk_folder<'a>(
    folder: &'a Folder,
    trail: &mut Vec<&'a Folder>,
    planned: &mut Vec<PlannedRequest<'a>>,
) {
    trail.push(folder);

    for request in &folder.requests {
        planned.push(PlannedRequest {
            index: planned.len(),
            request,
            ancestors: trail.clone(),
        });
    }

    for child in &folder.folders {
        walk_folder(child, trail, planned);
    }

    trail.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn request(id: &str) -> RequestDefinition {
        RequestDefinition::new(id, Method::Get, format!("http://example.com/{}", id))
    }

    #[test]
    fn test_plan_order_root_then_depth_first() {
        let mut collection = Collection::new("c1", "demo");
        collection.requests.push(request("root"));

        let inner = Folder {
            name: "inner".to_string(),
            requests: vec![request("inner-1")],
            ..Folder::default()
        };
        let outer = Folder {
            name: "outer".to_string(),
            requests: vec![request("outer-1"), request("outer-2")],
            folders: vec![inner],
            ..Folder::default()
        };
        let second = Folder {
            name: "second".to_string(),
            requests: vec![request("second-1")],
            ..Folder::default()
        };
        collection.folders = vec![outer, second];

        let plan = collection.plan();
        let ids: Vec<_> = plan.iter().map(|p| p.request.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["root", "outer-1", "outer-2", "inner-1", "second-1"]
        );
        assert_eq!(plan[3].folder_path(), "outer/inner");
        assert_eq!(plan[3].index, 3);
        assert!(plan[0].ancestors.is_empty());
    }

    #[test]
    fn test_has_flow_control_scans_folders() {
        let mut collection = Collection::new("c1", "demo");
        collection.requests.push(request("a"));
        assert!(!collection.has_flow_control());

        let mut gated = request("b");
        gated.flow_condition = "iteration > 0".to_string();
        collection.folders.push(Folder {
            name: "f".to_string(),
            requests: vec![gated],
            ..Folder::default()
        });
        assert!(collection.has_flow_control());
        assert!(collection.find_request("b").is_some());
    }
}
