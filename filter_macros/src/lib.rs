extern crate proc_macro;
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemStruct, LitStr};

/// Implements `RegisteredFilter` for a filter struct.
///
/// The registry tag defaults to the snake-case struct name without its `_filter` suffix
/// (`KillFilter` becomes `kill`). A string literal argument overrides it:
/// `#[register_filter("notch")]`.
///
/// The struct must provide `fn new(integration: &Integration) -> Self` and implement `Filter`.
#[proc_macro_attribute]
pub fn register_filter(attr: TokenStream, item: TokenStream) -> TokenStream {
    let tag = if attr.is_empty() {
        None
    } else {
        Some(parse_macro_input!(attr as LitStr))
    };
    let input = parse_macro_input!(item as ItemStruct);
    let struct_name = &input.ident;

    let tag = match tag {
        Some(lit) => lit.value(),
        None => {
            let snake = heck::ToSnakeCase::to_snake_case(struct_name.to_string().as_str());
            snake
                .strip_suffix("_filter")
                .map(str::to_string)
                .unwrap_or(snake)
        }
    };

    let expanded = quote! {
        #input

        impl crate::filters::filter::RegisteredFilter for #struct_name {
            const NAME: &'static str = #tag;

            fn create(
                integration: &crate::integration::Integration,
                settings: &crate::config::FilterSettings,
            ) -> crate::error::FilterResult<Box<dyn crate::filters::filter::Filter>> {
                let mut filter = <#struct_name>::new(integration);
                crate::filters::filter::Filter::configure(&mut filter, settings)?;
                Ok(Box::new(filter))
            }
        }
    };

    TokenStream::from(expanded)
}
