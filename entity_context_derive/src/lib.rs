use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Data, DeriveInput, Fields, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, ReturnType,
    Type, parse_macro_input, spanned::Spanned,
};

#[proc_macro_derive(ContextModel, attributes(context_model, context))]
pub fn derive_context_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_context_model(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[proc_macro_attribute]
pub fn context_methods(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[context_methods] does not accept arguments",
        )
        .to_compile_error()
        .into();
    }

    let input = parse_macro_input!(item as ItemImpl);
    match expand_context_methods(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct ContextModelOptions {
    name: Option<String>,
    sealed: bool,
    no_default: bool,
    constructor: Option<syn::Path>,
    methods: bool,
}

#[derive(Default)]
struct ContextFieldOptions {
    skip: bool,
    read_only: bool,
}

struct ContextField {
    ident: Ident,
    ty: Type,
    public: bool,
    read_only: bool,
}

// Public fields whose generated accessors collide with inherent proxy methods.
const SHADOWED_ACCESSOR_FIELDS: &[&str] = &["value"];

fn expand_context_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;
    let vis = input.vis;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "ContextModel does not support generic structs",
        ));
    }

    let options = parse_context_model_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "ContextModel can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields.named,
        Fields::Unit => Default::default(),
        Fields::Unnamed(_) => {
            return Err(syn::Error::new(
                struct_name.span(),
                "ContextModel requires named fields",
            ));
        }
    };

    let mut fields = Vec::<ContextField>::new();
    for field in named_fields {
        let ident = field.ident.clone().ok_or_else(|| {
            syn::Error::new(field.span(), "ContextModel requires named fields")
        })?;
        let field_options = parse_context_field_options(&field.attrs)?;
        if field_options.skip {
            continue;
        }
        let public = matches!(field.vis, syn::Visibility::Public(_));
        if public && SHADOWED_ACCESSOR_FIELDS.iter().any(|name| ident == *name) {
            return Err(syn::Error::new(
                ident.span(),
                format!(
                    "field `{0}` would generate get_{0}/set_{0} accessors hidden by ContextProxy::get_{0}/set_{0}; rename it or mark it #[context(skip)]",
                    ident
                ),
            ));
        }
        fields.push(ContextField {
            ident,
            ty: field.ty,
            public,
            read_only: field_options.read_only,
        });
    }

    let entity_name = options
        .name
        .clone()
        .unwrap_or_else(|| struct_name.to_string());

    let property_defs = fields.iter().map(|field| {
        let ident = &field.ident;
        let ty = &field.ty;
        let name = ident.to_string();
        let visibility = visibility_tokens(field.public);
        let setter = if field.read_only {
            quote!()
        } else {
            quote! {
                .setter(|entity: &mut Self, value: ::entity_context::Value| {
                    entity.#ident = <#ty as ::entity_context::ContextValue>::from_value(value)?;
                    Ok(())
                })
            }
        };
        quote! {
            .property(
                ::entity_context::PropertyDef::new(
                    #name,
                    <#ty as ::entity_context::ContextValue>::data_type(),
                    #visibility,
                )
                .getter(|entity: &Self| ::entity_context::ContextValue::to_value(&entity.#ident))
                #setter
            )
        }
    });

    let constructor = match (&options.constructor, options.no_default) {
        (Some(_), true) => {
            return Err(syn::Error::new(
                struct_name.span(),
                "#[context_model(constructor = ...)] cannot be combined with no_default",
            ));
        }
        (Some(path), false) => quote!(.constructor(#path)),
        (None, true) => quote!(),
        (None, false) => quote! {
            .constructor(|| Ok(<Self as ::core::default::Default>::default()))
        },
    };
    let sealed = options.sealed;

    let declared_methods = if options.methods {
        quote!()
    } else {
        quote! {
            impl ::entity_context::DeclaredMethods for #struct_name {}
        }
    };

    let accessors = expand_accessors(&struct_name, &vis, &fields);

    Ok(quote! {
        impl ::entity_context::ContextModel for #struct_name {
            fn entity_class() -> ::entity_context::EntityClass<Self> {
                ::entity_context::EntityClass::builder(#entity_name)
                    #(#property_defs)*
                    .methods(<Self as ::entity_context::DeclaredMethods>::declared_methods())
                    #constructor
                    .sealed(#sealed)
                    .build()
            }
        }

        #declared_methods

        #accessors
    })
}

/// Typed `get_<field>` / `set_<field>` wrappers over a bound proxy.
fn expand_accessors(struct_name: &Ident, vis: &syn::Visibility, fields: &[ContextField]) -> TokenStream2 {
    let accessors_name = format_ident!("{}Accessors", struct_name);
    let public_fields = fields.iter().filter(|field| field.public).collect::<Vec<_>>();

    let getter_sigs = public_fields.iter().map(|field| {
        let getter = format_ident!("get_{}", field.ident);
        let ty = &field.ty;
        quote!(fn #getter(&mut self) -> ::entity_context::Result<#ty>;)
    });
    let setter_sigs = public_fields.iter().filter(|field| !field.read_only).map(|field| {
        let setter = format_ident!("set_{}", field.ident);
        let ty = &field.ty;
        quote!(fn #setter(&mut self, value: #ty) -> ::entity_context::Result<()>;)
    });

    let getter_impls = public_fields.iter().map(|field| {
        let getter = format_ident!("get_{}", field.ident);
        let ty = &field.ty;
        let name = field.ident.to_string();
        quote! {
            fn #getter(&mut self) -> ::entity_context::Result<#ty> {
                self.get::<#ty>(#name)
            }
        }
    });
    let setter_impls = public_fields.iter().filter(|field| !field.read_only).map(|field| {
        let setter = format_ident!("set_{}", field.ident);
        let ty = &field.ty;
        let name = field.ident.to_string();
        quote! {
            fn #setter(&mut self, value: #ty) -> ::entity_context::Result<()> {
                self.set::<#ty>(#name, value)
            }
        }
    });

    quote! {
        #vis trait #accessors_name {
            #(#getter_sigs)*
            #(#setter_sigs)*
        }

        impl #accessors_name for ::entity_context::ContextProxy<#struct_name> {
            #(#getter_impls)*
            #(#setter_impls)*
        }
    }
}

fn expand_context_methods(mut item_impl: ItemImpl) -> syn::Result<TokenStream2> {
    if item_impl.trait_.is_some() {
        return Err(syn::Error::new(
            item_impl.span(),
            "#[context_methods] can only be used on inherent impl blocks",
        ));
    }
    if !item_impl.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item_impl.generics,
            "#[context_methods] does not support generic impl blocks",
        ));
    }

    let self_ty = item_impl.self_ty.clone();
    let mut method_defs = Vec::<TokenStream2>::new();

    for item in &mut item_impl.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        let field_options = take_context_method_options(&mut method.attrs)?;
        if field_options.skip {
            continue;
        }
        if let Some(method_def) = expand_method_def(method)? {
            method_defs.push(method_def);
        }
    }

    Ok(quote! {
        #item_impl

        impl ::entity_context::DeclaredMethods for #self_ty {
            fn declared_methods() -> ::std::vec::Vec<::entity_context::MethodDef<Self>> {
                vec![#(#method_defs),*]
            }
        }
    })
}

/// `None` for methods that cannot be called through a context: no `&self`
/// receiver, no return value, or generic.
fn expand_method_def(method: &ImplItemFn) -> syn::Result<Option<TokenStream2>> {
    let sig = &method.sig;
    let takes_shared_self = matches!(
        sig.inputs.first(),
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none()
    );
    if !takes_shared_self || !sig.generics.params.is_empty() || sig.asyncness.is_some() {
        return Ok(None);
    }
    let ReturnType::Type(_, return_ty) = &sig.output else {
        return Ok(None);
    };

    let mut arg_idents = Vec::<Ident>::new();
    let mut arg_types = Vec::<Type>::new();
    for input in sig.inputs.iter().skip(1) {
        let FnArg::Typed(arg) = input else {
            continue;
        };
        if matches!(arg.ty.as_ref(), Type::Reference(_)) {
            return Err(syn::Error::new(
                arg.ty.span(),
                "context methods take owned arguments; use #[context(skip)] to leave this method out",
            ));
        }
        arg_idents.push(format_ident!("arg{}", arg_idents.len()));
        arg_types.push(arg.ty.as_ref().clone());
    }

    let method_ident = &sig.ident;
    let name = method_ident.to_string();
    let arity = arg_idents.len();
    let indices = 0..arity;
    let visibility = visibility_tokens(matches!(method.vis, syn::Visibility::Public(_)));
    let try_op = if extract_result_ok_type(return_ty).is_some() {
        quote!(?)
    } else {
        quote!()
    };

    Ok(Some(quote! {
        ::entity_context::MethodDef::new(
            #name,
            #visibility,
            #arity,
            |entity: &Self, args: &[::entity_context::Value]| {
                ::entity_context::metadata::check_arity(#name, args, #arity)?;
                #(
                    let #arg_idents = <#arg_types as ::entity_context::ContextValue>::from_value(args[#indices].clone())?;
                )*
                let value = entity.#method_ident(#(#arg_idents),*)#try_op;
                Ok(::entity_context::ContextValue::to_value(&value))
            },
        )
    }))
}

fn visibility_tokens(public: bool) -> TokenStream2 {
    if public {
        quote!(::entity_context::Visibility::Public)
    } else {
        quote!(::entity_context::Visibility::Protected)
    }
}

fn extract_result_ok_type(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };
    for arg in &arguments.args {
        if let syn::GenericArgument::Type(ok_ty) = arg {
            return Some(ok_ty.clone());
        }
    }
    None
}

fn parse_context_model_options(attrs: &[syn::Attribute]) -> syn::Result<ContextModelOptions> {
    let mut options = ContextModelOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("context_model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.name = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("constructor") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.constructor = Some(lit.parse()?);
                return Ok(());
            }

            if meta.path.is_ident("sealed") {
                options.sealed = true;
                return Ok(());
            }

            if meta.path.is_ident("no_default") {
                options.no_default = true;
                return Ok(());
            }

            if meta.path.is_ident("methods") {
                options.methods = true;
                return Ok(());
            }

            Err(meta.error(
                "Unsupported context_model attribute. Supported: name = \"...\", constructor = \"path\", sealed, no_default, methods",
            ))
        })?;
    }

    Ok(options)
}

fn parse_context_options(attr: &syn::Attribute, options: &mut ContextFieldOptions) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("skip") {
            options.skip = true;
            return Ok(());
        }

        if meta.path.is_ident("read_only") {
            options.read_only = true;
            return Ok(());
        }

        Err(meta.error("Unsupported #[context(...)] option. Supported: skip, read_only"))
    })
}

fn parse_context_field_options(attrs: &[syn::Attribute]) -> syn::Result<ContextFieldOptions> {
    let mut options = ContextFieldOptions::default();
    for attr in attrs {
        if attr.path().is_ident("context") {
            parse_context_options(attr, &mut options)?;
        }
    }
    Ok(options)
}

/// Reads and removes `#[context(...)]` from a method, which the compiler
/// would otherwise reject as an unknown attribute.
fn take_context_method_options(attrs: &mut Vec<syn::Attribute>) -> syn::Result<ContextFieldOptions> {
    let mut options = ContextFieldOptions::default();
    let mut kept = Vec::with_capacity(attrs.len());
    for attr in attrs.drain(..) {
        if attr.path().is_ident("context") {
            parse_context_options(&attr, &mut options)?;
        } else {
            kept.push(attr);
        }
    }
    *attrs = kept;
    Ok(options)
}
