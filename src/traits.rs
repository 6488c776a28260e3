use std::fmt::{Debug, Display};
use std::hash::Hash;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel, Value,
};

use crate::config::TreeConfig;

/// Trait implemented by SeaORM `Model` types that participate in a tree.
///
/// Implementations are normally provided by the `#[derive(TreeModel)]` macro.
pub trait TreeModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    type Id: Clone + Debug + Display + Eq + Hash + Send + Sync + 'static;

    /// Fresh descriptor read from the mapping. Cache it with a
    /// [`TreeConfigRegistry`](crate::registry::TreeConfigRegistry).
    fn tree_config() -> TreeConfig;

    fn id(&self) -> Self::Id;
    fn parent_id(&self) -> Option<Self::Id>;
    fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>);
    fn id_to_value(id: &Self::Id) -> Value;
    /// Typed value for the parent column, `NULL` included.
    fn optional_id_to_value(id: Option<&Self::Id>) -> Value;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn parent_column() -> <Self::Entity as EntityTrait>::Column;

    /// Reflective read of any column of this model.
    fn column_value(&self, column: <Self::Entity as EntityTrait>::Column) -> Value;
}

/// Extra bindings for models whose ancestry is stored in a closure entity.
pub trait ClosureTreeModel: TreeModel {
    type HierarchyEntity: EntityTrait<Model = Self::HierarchyModel>;
    type HierarchyModel: Clone
        + Send
        + Sync
        + 'static
        + IntoActiveModel<Self::HierarchyActiveModel>
        + FromQueryResult;
    type HierarchyActiveModel: ActiveModelTrait<Entity = Self::HierarchyEntity>
        + ActiveModelBehavior
        + Send;

    fn hierarchy_ancestor_column() -> <Self::HierarchyEntity as EntityTrait>::Column;
    fn hierarchy_descendant_column() -> <Self::HierarchyEntity as EntityTrait>::Column;
    fn hierarchy_depth_column() -> <Self::HierarchyEntity as EntityTrait>::Column;

    fn hierarchy_id_to_value(id: &Self::Id) -> Value;
    fn hierarchy_model_ancestor(model: &Self::HierarchyModel) -> Self::Id;
    fn hierarchy_model_descendant(model: &Self::HierarchyModel) -> Self::Id;
    fn hierarchy_model_depth(model: &Self::HierarchyModel) -> i32;
    fn hierarchy_build_row(
        ancestor: Self::Id,
        descendant: Self::Id,
        depth: i32,
    ) -> Self::HierarchyActiveModel;
}
