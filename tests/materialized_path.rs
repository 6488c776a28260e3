mod common;

use chrono::{Duration, Utc};
use common::{path_node, setup_database, slug_node};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
};
use tree_behavior::path::hash;
use tree_behavior::{
    ChangeSet, InsertionPosition, MaterializedPathRepository, TreeConfigRegistry, TreeError,
    TreeNode,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;
type Paths = MaterializedPathRepository<path_node::Model>;
type Slugs = MaterializedPathRepository<slug_node::Model>;

async fn add(
    repo: &Paths,
    db: &DatabaseConnection,
    title: &str,
    position: InsertionPosition<i32>,
) -> Result<path_node::Model, TreeError> {
    let active = path_node::ActiveModel {
        title: Set(title.to_string()),
        ..Default::default()
    };
    repo.insert(db, active, position).await
}

async fn add_slug(
    repo: &Slugs,
    db: &DatabaseConnection,
    title: &str,
    position: InsertionPosition<i32>,
) -> Result<slug_node::Model, TreeError> {
    let active = slug_node::ActiveModel {
        title: Set(title.to_string()),
        ..Default::default()
    };
    repo.insert(db, active, position).await
}

async fn stored_path(db: &DatabaseConnection, id: i32) -> Result<(String, i32), sea_orm::DbErr> {
    let node = path_node::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| sea_orm::DbErr::RecordNotFound(format!("path node {id}")))?;
    Ok((node.path, node.lvl))
}

async fn slug(db: &DatabaseConnection, id: i32) -> Result<slug_node::Model, sea_orm::DbErr> {
    slug_node::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| sea_orm::DbErr::RecordNotFound(format!("slug node {id}")))
}

fn slug_paths(models: Vec<slug_node::Model>) -> Vec<String> {
    models.into_iter().map(|model| model.path).collect()
}

/// food > fruit > apple, drinks
async fn pantry(
    repo: &Slugs,
    db: &DatabaseConnection,
) -> Result<[slug_node::Model; 4], TreeError> {
    let food = add_slug(repo, db, "food", InsertionPosition::Root).await?;
    let fruit = add_slug(repo, db, "fruit", InsertionPosition::LastChildOf(food.id)).await?;
    let apple = add_slug(repo, db, "apple", InsertionPosition::LastChildOf(fruit.id)).await?;
    let drinks = add_slug(repo, db, "drinks", InsertionPosition::Root).await?;
    Ok([food, fruit, apple, drinks])
}

#[tokio::test]
async fn child_path_extends_parent_path() -> TestResult {
    let db = setup_database().await?;
    let repo = Paths::new(&TreeConfigRegistry::new())?;
    let root = add(&repo, &db, "vegetables", InsertionPosition::Root).await?;
    let child = add(&repo, &db, "fruit", InsertionPosition::LastChildOf(root.id)).await?;

    assert_eq!(root.path, "1,");
    assert_eq!(child.path, "1,2,");
    assert_eq!((root.lvl, child.lvl), (0, 1));

    let subtree = repo.get_tree(&db, Some(&root)).await?;
    let ids: Vec<i32> = subtree.iter().map(|node| node.id).collect();
    assert_eq!(ids, vec![root.id, child.id]);
    Ok(())
}

#[tokio::test]
async fn sibling_positions_share_the_parent() -> TestResult {
    let db = setup_database().await?;
    let repo = Paths::new(&TreeConfigRegistry::new())?;
    let root = add(&repo, &db, "root", InsertionPosition::Root).await?;
    let child = add(&repo, &db, "child", InsertionPosition::FirstChildOf(root.id)).await?;
    let sibling = add(&repo, &db, "sibling", InsertionPosition::PrevSiblingOf(child.id)).await?;

    assert_eq!(sibling.parent_id, Some(root.id));
    assert_eq!(sibling.path, "1,3,");
    Ok(())
}

#[tokio::test]
async fn moving_rewrites_descendant_prefixes() -> TestResult {
    let db = setup_database().await?;
    let repo = Paths::new(&TreeConfigRegistry::new())?;
    let one = add(&repo, &db, "one", InsertionPosition::Root).await?;
    let two = add(&repo, &db, "two", InsertionPosition::LastChildOf(one.id)).await?;
    let three = add(&repo, &db, "three", InsertionPosition::LastChildOf(two.id)).await?;
    let four = add(&repo, &db, "four", InsertionPosition::Root).await?;

    let moved = repo
        .move_node(&db, &two, InsertionPosition::LastChildOf(four.id))
        .await?;
    assert_eq!(moved.path, "4,2,");
    assert_eq!(moved.parent_id, Some(four.id));
    assert_eq!(stored_path(&db, three.id).await?, ("4,2,3,".to_string(), 2));
    assert_eq!(stored_path(&db, one.id).await?, ("1,".to_string(), 0));

    let moved = repo.move_node(&db, &two, InsertionPosition::Root).await?;
    assert_eq!(moved.path, "2,");
    assert_eq!(moved.lvl, 0);
    assert_eq!(stored_path(&db, three.id).await?, ("2,3,".to_string(), 1));
    Ok(())
}

#[tokio::test]
async fn moving_under_a_descendant_is_rejected() -> TestResult {
    let db = setup_database().await?;
    let repo = Paths::new(&TreeConfigRegistry::new())?;
    let one = add(&repo, &db, "one", InsertionPosition::Root).await?;
    let two = add(&repo, &db, "two", InsertionPosition::LastChildOf(one.id)).await?;
    let three = add(&repo, &db, "three", InsertionPosition::LastChildOf(two.id)).await?;

    let err = repo
        .move_node(&db, &one, InsertionPosition::LastChildOf(three.id))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::InvalidArgument(_)), "{err}");
    assert_eq!(stored_path(&db, three.id).await?, ("1,2,3,".to_string(), 2));
    Ok(())
}

#[tokio::test]
async fn recover_rebuilds_paths_from_parents() -> TestResult {
    let db = setup_database().await?;
    let repo = Paths::new(&TreeConfigRegistry::new())?;
    let one = add(&repo, &db, "one", InsertionPosition::Root).await?;
    let two = add(&repo, &db, "two", InsertionPosition::LastChildOf(one.id)).await?;
    let three = add(&repo, &db, "three", InsertionPosition::LastChildOf(two.id)).await?;

    path_node::Entity::update_many()
        .col_expr(path_node::Column::Path, Expr::value("broken"))
        .col_expr(path_node::Column::Lvl, Expr::value(7))
        .exec(&db)
        .await?;

    repo.recover(&db).await?;
    assert_eq!(stored_path(&db, one.id).await?, ("1,".to_string(), 0));
    assert_eq!(stored_path(&db, two.id).await?, ("1,2,".to_string(), 1));
    assert_eq!(stored_path(&db, three.id).await?, ("1,2,3,".to_string(), 2));
    Ok(())
}

#[tokio::test]
async fn string_sources_append_the_id_and_hash_the_path() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, fruit, apple, drinks] = pantry(&repo, &db).await?;

    assert_eq!(food.path, "food-1,");
    assert_eq!(fruit.path, "food-1,fruit-2,");
    assert_eq!(apple.path, "food-1,fruit-2,apple-3,");
    assert_eq!(drinks.path, "drinks-4,");
    assert_eq!(apple.lvl, 2);
    assert_eq!(fruit.path_hash, hash("food-1,fruit-2,"));
    Ok(())
}

#[tokio::test]
async fn source_containing_the_separator_is_rejected() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;

    let err = add_slug(&repo, &db, "a,b", InsertionPosition::Root)
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::InvalidArgument(_)), "{err}");
    assert_eq!(slug_node::Entity::find().count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn hashed_paths_move_row_by_row() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, fruit, apple, drinks] = pantry(&repo, &db).await?;

    repo.move_node(&db, &fruit, InsertionPosition::LastChildOf(drinks.id))
        .await?;

    let apple = slug(&db, apple.id).await?;
    assert_eq!(apple.path, "drinks-4,fruit-2,apple-3,");
    assert_eq!(apple.path_hash, hash("drinks-4,fruit-2,apple-3,"));
    assert_eq!(apple.lvl, 2);
    assert_eq!(slug(&db, fruit.id).await?.parent_id, Some(drinks.id));
    assert_eq!(slug(&db, food.id).await?.lock_time, None);
    assert_eq!(slug(&db, drinks.id).await?.lock_time, None);
    Ok(())
}

#[tokio::test]
async fn renaming_the_source_rewrites_the_subtree() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [_food, fruit, apple, _drinks] = pantry(&repo, &db).await?;

    let mut renamed = fruit.clone();
    renamed.title = "berry".to_string();
    let moved = repo
        .listener()
        .before_update(&db, &renamed, &ChangeSet::new().with("title"))
        .await?
        .ok_or("node was not updated")?;

    assert_eq!(moved.title, "berry");
    assert_eq!(moved.path, "food-1,berry-2,");
    assert_eq!(slug(&db, apple.id).await?.path, "food-1,berry-2,apple-3,");
    Ok(())
}

#[tokio::test]
async fn remove_deletes_everything_under_the_path() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, fruit, _apple, _drinks] = pantry(&repo, &db).await?;

    repo.remove(&db, &fruit).await?;

    let remaining = repo.get_tree(&db, None).await?;
    assert_eq!(slug_paths(remaining), vec!["drinks-4,", "food-1,"]);
    assert_eq!(repo.child_count(&db, Some(&food), false).await?, 0);
    Ok(())
}

#[tokio::test]
async fn reads_follow_the_paths() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, _fruit, apple, _drinks] = pantry(&repo, &db).await?;

    let roots = repo.get_root_nodes(&db, None).await?;
    assert_eq!(slug_paths(roots), vec!["drinks-4,", "food-1,"]);

    let direct = repo.get_children(&db, Some(&food), true, None, false).await?;
    assert_eq!(slug_paths(direct), vec!["food-1,fruit-2,"]);

    let all = repo.get_children(&db, Some(&food), false, None, true).await?;
    assert_eq!(
        slug_paths(all),
        vec!["food-1,", "food-1,fruit-2,", "food-1,fruit-2,apple-3,"]
    );
    assert_eq!(repo.child_count(&db, Some(&food), true).await?, 1);
    assert_eq!(repo.child_count(&db, Some(&food), false).await?, 2);
    assert_eq!(repo.child_count(&db, None, true).await?, 2);

    let path = repo.get_path(&db, &apple).await?;
    let titles: Vec<String> = path.into_iter().map(|node| node.title).collect();
    assert_eq!(titles, vec!["food", "fruit", "apple"]);
    Ok(())
}

#[tokio::test]
async fn locked_root_blocks_structural_changes() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, fruit, _apple, _drinks] = pantry(&repo, &db).await?;
    assert_eq!(slug(&db, food.id).await?.lock_time, None);

    slug_node::Entity::update_many()
        .col_expr(
            slug_node::Column::LockTime,
            Expr::value(Utc::now().naive_utc()),
        )
        .filter(slug_node::Column::Id.eq(food.id))
        .exec(&db)
        .await?;

    let err = add_slug(&repo, &db, "pear", InsertionPosition::LastChildOf(fruit.id))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::Locked(_)), "{err}");
    assert_eq!(slug_node::Entity::find().count(&db).await?, 4);

    let stale = Utc::now().naive_utc() - Duration::hours(1);
    slug_node::Entity::update_many()
        .col_expr(slug_node::Column::LockTime, Expr::value(stale))
        .filter(slug_node::Column::Id.eq(food.id))
        .exec(&db)
        .await?;

    let pear = add_slug(&repo, &db, "pear", InsertionPosition::LastChildOf(fruit.id)).await?;
    assert_eq!(pear.path, "food-1,fruit-2,pear-5,");
    assert_eq!(slug(&db, food.id).await?.lock_time, None);
    Ok(())
}

#[tokio::test]
async fn recover_repairs_levels_under_intact_paths() -> TestResult {
    let db = setup_database().await?;
    let repo = Paths::new(&TreeConfigRegistry::new())?;
    let one = add(&repo, &db, "one", InsertionPosition::Root).await?;
    let two = add(&repo, &db, "two", InsertionPosition::LastChildOf(one.id)).await?;

    path_node::Entity::update_many()
        .col_expr(path_node::Column::Lvl, Expr::value(7))
        .exec(&db)
        .await?;

    repo.recover(&db).await?;
    assert_eq!(stored_path(&db, one.id).await?, ("1,".to_string(), 0));
    assert_eq!(stored_path(&db, two.id).await?, ("1,2,".to_string(), 1));
    Ok(())
}

#[tokio::test]
async fn recover_repairs_hashes_under_intact_paths() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, _fruit, apple, _drinks] = pantry(&repo, &db).await?;

    slug_node::Entity::update_many()
        .col_expr(slug_node::Column::PathHash, Expr::value("bogus"))
        .filter(slug_node::Column::Id.is_in([food.id, apple.id]))
        .exec(&db)
        .await?;

    repo.recover(&db).await?;
    let food = slug(&db, food.id).await?;
    let apple = slug(&db, apple.id).await?;
    assert_eq!(food.path, "food-1,");
    assert_eq!(food.path_hash, hash("food-1,"));
    assert_eq!(apple.path_hash, hash("food-1,fruit-2,apple-3,"));
    Ok(())
}

#[tokio::test]
async fn recover_twice_changes_nothing() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    pantry(&repo, &db).await?;

    slug_node::Entity::update_many()
        .col_expr(slug_node::Column::Path, Expr::value("broken"))
        .col_expr(slug_node::Column::Lvl, Expr::value(3))
        .exec(&db)
        .await?;

    repo.recover(&db).await?;
    let first = repo.get_tree(&db, None).await?;
    repo.recover(&db).await?;
    let second = repo.get_tree(&db, None).await?;

    assert_eq!(first, second);
    assert_eq!(
        slug_paths(second),
        vec![
            "drinks-4,",
            "food-1,",
            "food-1,fruit-2,",
            "food-1,fruit-2,apple-3,"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn path_length_matches_level() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let nodes = pantry(&repo, &db).await?;

    for node in &nodes {
        let path = repo.get_path(&db, node).await?;
        let stored = slug(&db, node.id).await?;
        assert_eq!(path.len() as i32 - 1, stored.lvl, "node {}", node.title);
        assert_eq!(path.last().map(|last| last.id), Some(node.id));
    }
    Ok(())
}

#[tokio::test]
async fn empty_source_is_rejected() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;

    let err = add_slug(&repo, &db, "", InsertionPosition::Root)
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::InvalidArgument(_)), "{err}");
    assert_eq!(slug_node::Entity::find().count(&db).await?, 0);
    Ok(())
}

fn hierarchy_titles(nodes: &[TreeNode<slug_node::Model>]) -> Vec<&str> {
    nodes.iter().map(|node| node.model.title.as_str()).collect()
}

#[tokio::test]
async fn children_hierarchy_nests_by_path() -> TestResult {
    let db = setup_database().await?;
    let repo = Slugs::new(&TreeConfigRegistry::new())?;
    let [food, _fruit, _apple, _drinks] = pantry(&repo, &db).await?;

    let tree = repo.children_hierarchy(&db, None, false, false).await?;
    assert_eq!(hierarchy_titles(&tree), vec!["drinks", "food"]);
    assert_eq!(hierarchy_titles(&tree[1].children), vec!["fruit"]);
    assert_eq!(hierarchy_titles(&tree[1].children[0].children), vec!["apple"]);

    let subtree = repo.children_hierarchy(&db, Some(&food), false, true).await?;
    assert_eq!(hierarchy_titles(&subtree), vec!["food"]);
    assert_eq!(subtree[0].size(), 3);

    let direct = repo.children_hierarchy(&db, Some(&food), true, false).await?;
    assert_eq!(hierarchy_titles(&direct), vec!["fruit"]);
    assert!(direct[0].is_leaf());
    Ok(())
}
