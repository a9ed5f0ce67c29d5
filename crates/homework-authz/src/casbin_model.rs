//! The Casbin model every role rule set is evaluated against.
//!
//! Rules are flat `(subject, tenant, route pattern, method)` tuples; there is
//! no role inheritance, so the model carries no role definition section.
use crate::AuthzResult;
use casbin::prelude::DefaultModel;

const ROUTE_RULE_MODEL: &str = "\
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.dom == p.dom && keyMatch2(r.obj, p.obj) && r.act == p.act
";

pub async fn route_rule_model() -> AuthzResult<DefaultModel> {
    Ok(DefaultModel::from_str(ROUTE_RULE_MODEL).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casbin::Model;

    #[tokio::test]
    async fn rules_are_flat_four_field_tuples() {
        let model = route_rule_model().await.expect("model");
        let sections = model.get_model();
        assert!(sections.contains_key("p"));
        assert!(sections.contains_key("m"));
        assert!(!sections.contains_key("g"));
    }
}
