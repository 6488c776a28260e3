#![allow(dead_code)]

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};

pub mod category {
    use sea_orm::entity::prelude::*;
    use tree_behavior::TreeModelDerive as TreeModel;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "categories")]
    #[tree(strategy = "nested", left = "lft", right = "rgt", level = "lvl")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub title: String,
        pub lft: i32,
        pub rgt: i32,
        pub lvl: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod forest_node {
    use sea_orm::entity::prelude::*;
    use tree_behavior::TreeModelDerive as TreeModel;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "forest_nodes")]
    #[tree(
        strategy = "nested",
        left = "lft",
        right = "rgt",
        level = "lvl",
        root = "root_id"
    )]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub root_id: Option<i32>,
        pub title: String,
        pub lft: i32,
        pub rgt: i32,
        pub lvl: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod path_node {
    use sea_orm::entity::prelude::*;
    use tree_behavior::TreeModelDerive as TreeModel;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "path_nodes")]
    #[tree(
        strategy = "materialized_path",
        path = "path",
        path_source = "id",
        level = "lvl"
    )]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub title: String,
        pub path: String,
        pub lvl: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod slug_node {
    use sea_orm::entity::prelude::*;
    use tree_behavior::TreeModelDerive as TreeModel;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "slug_nodes")]
    #[tree(
        strategy = "materialized_path",
        path = "path",
        path_source = "title",
        path_hash = "path_hash",
        level = "lvl",
        lock_time = "lock_time",
        activate_locking = true
    )]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub title: String,
        pub path: String,
        pub path_hash: String,
        pub lvl: i32,
        pub lock_time: Option<DateTime>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod node {
    use sea_orm::entity::prelude::*;
    use tree_behavior::TreeModelDerive as TreeModel;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "nodes")]
    #[tree(
        hierarchy_module = "crate::common::node_hierarchy",
        hierarchy_table = "node_hierarchies"
    )]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod node_hierarchy {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "node_hierarchies")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub ancestor_id: i32,
        #[sea_orm(primary_key, auto_increment = false)]
        pub descendant_id: i32,
        pub depth: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        title TEXT NOT NULL,
        lft INTEGER NOT NULL,
        rgt INTEGER NOT NULL,
        lvl INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE forest_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        root_id INTEGER NULL,
        title TEXT NOT NULL,
        lft INTEGER NOT NULL,
        rgt INTEGER NOT NULL,
        lvl INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE path_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        title TEXT NOT NULL,
        path TEXT NOT NULL,
        lvl INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE slug_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        title TEXT NOT NULL,
        path TEXT NOT NULL,
        path_hash TEXT NOT NULL,
        lvl INTEGER NOT NULL,
        lock_time TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE node_hierarchies (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        depth INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )
    "#,
];

/// A private in-memory database with every test table created.
///
/// The pool holds a single connection, so the database lives as long as the returned handle.
pub async fn setup_database() -> Result<DatabaseConnection, sea_orm::DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    for statement in SCHEMA {
        db.execute(Statement::from_string(DbBackend::Sqlite, *statement))
            .await?;
    }
    Ok(db)
}
