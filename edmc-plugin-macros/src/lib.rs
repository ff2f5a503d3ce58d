//! Procedural macros for the EDMC plugin engine

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{
    Attribute, Ident, ImplItem, ItemImpl, LitStr, Token, parse_macro_input, punctuated::Punctuated,
    spanned::Spanned,
};

/// Hooks and the provider declared on one method
struct MarkedMethod {
    ident: Ident,
    events: Vec<LitStr>,
    capability: Option<LitStr>,
}

fn is_marker(attr: &Attribute, name: &str) -> bool {
    attr.path().segments.last().is_some_and(|s| s.ident == name)
}

/// Mark an inherent impl block as a plugin class.
///
/// Methods inside may carry `#[hook("event.name", ...)]` (stackable) and
/// `#[provider("capability")]`. The block must define
/// `fn new(ctx: PluginContext) -> anyhow::Result<Self>`; the type must
/// implement `Plugin`.
///
/// ```ignore
/// #[edmc_plugin]
/// impl Tracker {
///     fn new(ctx: PluginContext) -> anyhow::Result<Self> { ... }
///
///     #[hook("core.journal_entry")]
///     fn on_journal(&mut self, event: &Event) -> anyhow::Result<()> { ... }
///
///     #[provider("system_url")]
///     fn system_url(&mut self, args: &[Value]) -> anyhow::Result<Option<String>> { ... }
/// }
/// ```
#[proc_macro_attribute]
pub fn edmc_plugin(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(Span::call_site(), "#[edmc_plugin] takes no arguments")
            .to_compile_error()
            .into();
    }
    let item_impl = parse_macro_input!(item as ItemImpl);
    match expand_plugin(item_impl) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_plugin(mut item_impl: ItemImpl) -> syn::Result<proc_macro2::TokenStream> {
    if let Some((_, path, _)) = &item_impl.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[edmc_plugin] must be placed on an inherent impl block",
        ));
    }
    if let Some(attr) = item_impl.attrs.iter().find(|a| is_marker(a, "edmc_plugin")) {
        return Err(syn::Error::new(
            attr.span(),
            "this type is already marked as a plugin entry point",
        ));
    }

    let mut has_new = false;
    let mut methods: Vec<MarkedMethod> = Vec::new();
    for item in &mut item_impl.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        if method.sig.ident == "new" {
            has_new = true;
        }

        let mut marked = MarkedMethod {
            ident: method.sig.ident.clone(),
            events: Vec::new(),
            capability: None,
        };
        let mut kept = Vec::with_capacity(method.attrs.len());
        for attr in method.attrs.drain(..) {
            if is_marker(&attr, "hook") {
                let events = attr.parse_args_with(Punctuated::<LitStr, Token![,]>::parse_terminated)?;
                if events.is_empty() {
                    return Err(syn::Error::new(attr.span(), "#[hook] needs at least one event name"));
                }
                for event in events {
                    if event.value().is_empty() {
                        return Err(syn::Error::new(event.span(), "event name cannot be empty"));
                    }
                    if marked.events.iter().any(|e| e.value() == event.value()) {
                        return Err(syn::Error::new(
                            event.span(),
                            format!(
                                "{} hooked onto the same event multiple times: {}",
                                marked.ident,
                                event.value()
                            ),
                        ));
                    }
                    marked.events.push(event);
                }
            } else if is_marker(&attr, "provider") {
                let capability: LitStr = attr.parse_args()?;
                if capability.value().is_empty() {
                    return Err(syn::Error::new(capability.span(), "capability name cannot be empty"));
                }
                if marked.capability.is_some() {
                    return Err(syn::Error::new(attr.span(), "a method can provide only one capability"));
                }
                if let Some(other) = methods
                    .iter()
                    .find(|m| m.capability.as_ref().is_some_and(|c| c.value() == capability.value()))
                {
                    return Err(syn::Error::new(
                        capability.span(),
                        format!(
                            "capability {} is already provided by {}",
                            capability.value(),
                            other.ident
                        ),
                    ));
                }
                marked.capability = Some(capability);
            } else {
                kept.push(attr);
            }
        }
        method.attrs = kept;

        if !marked.events.is_empty() || marked.capability.is_some() {
            methods.push(marked);
        }
    }

    if !has_new {
        return Err(syn::Error::new(
            item_impl.self_ty.span(),
            "#[edmc_plugin] requires `fn new(ctx: PluginContext) -> anyhow::Result<Self>` in the impl block",
        ));
    }

    let hooks = methods.iter().filter(|m| !m.events.is_empty()).map(|m| {
        let ident = &m.ident;
        let name = ident.to_string();
        let events = &m.events;
        quote! {
            let markers = markers.hook(#name, &[#(#events),*], Self::#ident)?;
        }
    });
    let providers = methods.iter().filter_map(|m| {
        let capability = m.capability.as_ref()?;
        let ident = &m.ident;
        let name = ident.to_string();
        Some(quote! {
            let markers = markers.provider(#capability, #name, Self::#ident)?;
        })
    });

    let self_ty = &item_impl.self_ty;
    let (impl_generics, _, where_clause) = item_impl.generics.split_for_impl();

    Ok(quote! {
        #item_impl

        impl #impl_generics ::edmc_plugin::PluginClass for #self_ty #where_clause {
            fn new(ctx: ::edmc_plugin::PluginContext) -> ::edmc_plugin::anyhow::Result<Self> {
                <#self_ty>::new(ctx)
            }

            fn markers() -> ::core::result::Result<
                ::edmc_plugin::ClassMarkers<Self>,
                ::edmc_plugin::DeclarationError,
            > {
                let markers = ::edmc_plugin::ClassMarkers::<Self>::new();
                #(#hooks)*
                #(#providers)*
                ::core::result::Result::Ok(markers)
            }
        }
    })
}

fn outside_plugin(name: &str, item: TokenStream) -> TokenStream {
    let item = proc_macro2::TokenStream::from(item);
    let message = format!("#[{}] can only be used on a method inside an #[edmc_plugin] impl block", name);
    quote! {
        ::core::compile_error!(#message);
        #item
    }
    .into()
}

/// Hook a method onto one or more event names. Only valid inside
/// `#[edmc_plugin]`.
#[proc_macro_attribute]
pub fn hook(_attr: TokenStream, item: TokenStream) -> TokenStream {
    outside_plugin("hook", item)
}

/// Mark a method as the provider of a capability. Only valid inside
/// `#[edmc_plugin]`.
#[proc_macro_attribute]
pub fn provider(_attr: TokenStream, item: TokenStream) -> TokenStream {
    outside_plugin("provider", item)
}
