use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{
    parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, LitStr,
    Path, Type,
};

#[proc_macro_derive(TreeModel, attributes(tree))]
pub fn derive_tree_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_tree_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    strategy: Option<LitStr>,
    entity_name: Option<String>,
    id_field: Option<String>,
    id_type: Option<Type>,
    parent_field: Option<String>,
    left_field: Option<String>,
    right_field: Option<String>,
    level_field: Option<String>,
    root_field: Option<String>,
    path_field: Option<String>,
    path_source_field: Option<String>,
    path_hash_field: Option<String>,
    path_separator: Option<String>,
    path_append_id: Option<bool>,
    path_starts_with_separator: Option<bool>,
    path_ends_with_separator: Option<bool>,
    lock_time_field: Option<String>,
    activate_locking: Option<bool>,
    locking_timeout: Option<u64>,
    hierarchy_module: Option<Path>,
    hierarchy_table: Option<String>,
    ancestor_field: Option<String>,
    descendant_field: Option<String>,
    depth_field: Option<String>,
}

fn impl_tree_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "TreeModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("tree") {
            parse_tree_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.clone().unwrap_or_else(|| "id".to_string());
    let parent_field_name = options
        .parent_field
        .clone()
        .unwrap_or_else(|| "parent_id".to_string());

    let id_field_ident = Ident::new(&id_field_name, struct_ident.span());
    let parent_field_ident = Ident::new(&parent_field_name, struct_ident.span());

    let mut id_field_type: Option<Type> = options.id_type.clone();

    if let Fields::Named(ref fields) = data_struct.fields {
        for field in &fields.named {
            if let Some(ident) = &field.ident {
                if ident == &id_field_ident && id_field_type.is_none() {
                    id_field_type = Some(field.ty.clone());
                }
            }
        }
    } else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "TreeModel requires named fields",
        ));
    }

    let id_type = id_field_type.ok_or_else(|| {
        syn::Error::new(
            struct_ident.span(),
            "Unable to determine id field type; specify `id_type = ...` in #[tree]",
        )
    })?;

    let strategy_variant = match &options.strategy {
        Some(lit) => match lit.value().as_str() {
            "nested" => format_ident!("Nested"),
            "materialized_path" | "materializedPath" => format_ident!("MaterializedPath"),
            "closure" => format_ident!("Closure"),
            other => {
                return Err(syn::Error::new(
                    lit.span(),
                    format!(
                        "Unsupported tree strategy `{other}`; expected `nested`, `materialized_path` or `closure`"
                    ),
                ))
            }
        },
        None if options.hierarchy_module.is_some() => format_ident!("Closure"),
        None => format_ident!("Nested"),
    };

    let entity_name = options
        .entity_name
        .clone()
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let base_table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let parent_column_variant = format_ident!("{}", to_pascal_case(&parent_field_name));

    let entity_name_literal = LitStr::new(&entity_name, struct_ident.span());
    let id_column_literal = LitStr::new(&id_field_name, struct_ident.span());
    let parent_column_literal = LitStr::new(&parent_field_name, struct_ident.span());

    let mut option_calls: Vec<TokenStream2> = Vec::new();
    let string_options = [
        ("left_column", &options.left_field),
        ("right_column", &options.right_field),
        ("level_column", &options.level_field),
        ("root_column", &options.root_field),
        ("path_column", &options.path_field),
        ("path_source_column", &options.path_source_field),
        ("path_hash_column", &options.path_hash_field),
        ("path_separator", &options.path_separator),
        ("lock_time_column", &options.lock_time_field),
    ];
    for (method, value) in string_options {
        if let Some(value) = value {
            let method = format_ident!("{}", method);
            let literal = LitStr::new(value, struct_ident.span());
            option_calls.push(quote! { .#method(#literal) });
        }
    }
    let bool_options = [
        ("path_append_id", options.path_append_id),
        ("path_starts_with_separator", options.path_starts_with_separator),
        ("path_ends_with_separator", options.path_ends_with_separator),
        ("activate_locking", options.activate_locking),
    ];
    for (method, value) in bool_options {
        if let Some(value) = value {
            let method = format_ident!("{}", method);
            option_calls.push(quote! { .#method(#value) });
        }
    }
    if let Some(timeout) = options.locking_timeout {
        option_calls.push(quote! {
            .locking_timeout(::std::time::Duration::from_secs(#timeout))
        });
    }

    let closure_impl = match &options.hierarchy_module {
        Some(hierarchy_module_path) => {
            let hierarchy_table = options
                .hierarchy_table
                .clone()
                .unwrap_or_else(|| format!("{}_hierarchies", base_table));
            let hierarchy_table_literal = LitStr::new(&hierarchy_table, struct_ident.span());
            option_calls.push(quote! { .closure_table(#hierarchy_table_literal) });

            impl_closure_tree_model(struct_ident, hierarchy_module_path, &options)
        }
        None => TokenStream2::new(),
    };

    let generated = quote! {
        impl ::tree_behavior::TreeModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            fn tree_config() -> ::tree_behavior::TreeConfig {
                let base = ::tree_behavior::TreeConfig::new(
                    #entity_name_literal,
                    ::tree_behavior::StrategyKind::#strategy_variant,
                );
                ::tree_behavior::TreeOptions::default()
                    .id_column(#id_column_literal)
                    .parent_column(#parent_column_literal)
                    #(#option_calls)*
                    .apply(base)
            }

            fn id(&self) -> Self::Id {
                self.#id_field_ident.clone()
            }

            fn parent_id(&self) -> Option<Self::Id> {
                self.#parent_field_ident.clone()
            }

            fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>) {
                active.#parent_field_ident = ::sea_orm::ActiveValue::Set(parent);
            }

            fn id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn optional_id_to_value(id: Option<&Self::Id>) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.cloned())
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column_variant
            }

            fn column_value(
                &self,
                column: <Self::Entity as ::sea_orm::EntityTrait>::Column,
            ) -> ::sea_orm::Value {
                <Self as ::sea_orm::ModelTrait>::get(self, column)
            }
        }

        #closure_impl
    };

    Ok(generated.into())
}

fn impl_closure_tree_model(
    struct_ident: &Ident,
    hierarchy_module_path: &Path,
    options: &Options,
) -> TokenStream2 {
    let ancestor_field_name = options
        .ancestor_field
        .clone()
        .unwrap_or_else(|| "ancestor_id".to_string());
    let descendant_field_name = options
        .descendant_field
        .clone()
        .unwrap_or_else(|| "descendant_id".to_string());
    let depth_field_name = options
        .depth_field
        .clone()
        .unwrap_or_else(|| "depth".to_string());

    let ancestor_field_ident = Ident::new(&ancestor_field_name, struct_ident.span());
    let descendant_field_ident = Ident::new(&descendant_field_name, struct_ident.span());
    let depth_field_ident = Ident::new(&depth_field_name, struct_ident.span());

    let ancestor_column_variant = format_ident!("{}", to_pascal_case(&ancestor_field_name));
    let descendant_column_variant = format_ident!("{}", to_pascal_case(&descendant_field_name));
    let depth_column_variant = format_ident!("{}", to_pascal_case(&depth_field_name));

    quote! {
        impl ::tree_behavior::ClosureTreeModel for #struct_ident {
            type HierarchyEntity = #hierarchy_module_path::Entity;
            type HierarchyModel = #hierarchy_module_path::Model;
            type HierarchyActiveModel = #hierarchy_module_path::ActiveModel;

            fn hierarchy_ancestor_column() -> <Self::HierarchyEntity as ::sea_orm::EntityTrait>::Column {
                #hierarchy_module_path::Column::#ancestor_column_variant
            }

            fn hierarchy_descendant_column() -> <Self::HierarchyEntity as ::sea_orm::EntityTrait>::Column {
                #hierarchy_module_path::Column::#descendant_column_variant
            }

            fn hierarchy_depth_column() -> <Self::HierarchyEntity as ::sea_orm::EntityTrait>::Column {
                #hierarchy_module_path::Column::#depth_column_variant
            }

            fn hierarchy_id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn hierarchy_model_ancestor(model: &Self::HierarchyModel) -> Self::Id {
                model.#ancestor_field_ident.clone()
            }

            fn hierarchy_model_descendant(model: &Self::HierarchyModel) -> Self::Id {
                model.#descendant_field_ident.clone()
            }

            fn hierarchy_model_depth(model: &Self::HierarchyModel) -> i32 {
                model.#depth_field_ident
            }

            fn hierarchy_build_row(
                ancestor: Self::Id,
                descendant: Self::Id,
                depth: i32,
            ) -> Self::HierarchyActiveModel {
                #[allow(clippy::needless_update)]
                {
                    #hierarchy_module_path::ActiveModel {
                        #ancestor_field_ident: ::sea_orm::ActiveValue::Set(ancestor),
                        #descendant_field_ident: ::sea_orm::ActiveValue::Set(descendant),
                        #depth_field_ident: ::sea_orm::ActiveValue::Set(depth),
                        ..::core::default::Default::default()
                    }
                }
            }
        }
    }
}

fn parse_tree_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        match ident.as_str() {
            "strategy" => {
                options.strategy = Some(meta.value()?.parse()?);
            }
            "entity_name" => {
                let value: LitStr = meta.value()?.parse()?;
                options.entity_name = Some(value.value());
            }
            "id_field" => {
                let value: LitStr = meta.value()?.parse()?;
                options.id_field = Some(value.value());
            }
            "id_type" => {
                let ty: Type = meta.value()?.parse()?;
                options.id_type = Some(ty);
            }
            "parent_field" => {
                let value: LitStr = meta.value()?.parse()?;
                options.parent_field = Some(value.value());
            }
            "left" => {
                let value: LitStr = meta.value()?.parse()?;
                options.left_field = Some(value.value());
            }
            "right" => {
                let value: LitStr = meta.value()?.parse()?;
                options.right_field = Some(value.value());
            }
            "level" => {
                let value: LitStr = meta.value()?.parse()?;
                options.level_field = Some(value.value());
            }
            "root" => {
                let value: LitStr = meta.value()?.parse()?;
                options.root_field = Some(value.value());
            }
            "path" => {
                let value: LitStr = meta.value()?.parse()?;
                options.path_field = Some(value.value());
            }
            "path_source" => {
                let value: LitStr = meta.value()?.parse()?;
                options.path_source_field = Some(value.value());
            }
            "path_hash" => {
                let value: LitStr = meta.value()?.parse()?;
                options.path_hash_field = Some(value.value());
            }
            "path_separator" => {
                let value: LitStr = meta.value()?.parse()?;
                options.path_separator = Some(value.value());
            }
            "path_append_id" => {
                let value: syn::LitBool = meta.value()?.parse()?;
                options.path_append_id = Some(value.value);
            }
            "path_starts_with_separator" => {
                let value: syn::LitBool = meta.value()?.parse()?;
                options.path_starts_with_separator = Some(value.value);
            }
            "path_ends_with_separator" => {
                let value: syn::LitBool = meta.value()?.parse()?;
                options.path_ends_with_separator = Some(value.value);
            }
            "lock_time" => {
                let value: LitStr = meta.value()?.parse()?;
                options.lock_time_field = Some(value.value());
            }
            "activate_locking" => {
                let value: syn::LitBool = meta.value()?.parse()?;
                options.activate_locking = Some(value.value);
            }
            "locking_timeout" => {
                let value: syn::LitInt = meta.value()?.parse()?;
                options.locking_timeout = Some(value.base10_parse::<u64>()?);
            }
            "hierarchy_module" => {
                let value: LitStr = meta.value()?.parse()?;
                options.hierarchy_module = Some(parse_path(&value.value(), value.span())?);
            }
            "hierarchy_table" => {
                let value: LitStr = meta.value()?.parse()?;
                options.hierarchy_table = Some(value.value());
            }
            "ancestor_field" => {
                let value: LitStr = meta.value()?.parse()?;
                options.ancestor_field = Some(value.value());
            }
            "descendant_field" => {
                let value: LitStr = meta.value()?.parse()?;
                options.descendant_field = Some(value.value());
            }
            "depth_field" => {
                let value: LitStr = meta.value()?.parse()?;
                options.depth_field = Some(value.value());
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported tree option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            // Skip `key = value` options we do not care about.
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_path(value: &str, span: proc_macro2::Span) -> syn::Result<Path> {
    syn::parse_str::<Path>(value).map_err(|_| syn::Error::new(span, "Invalid path"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
