#![windows_subsystem = "windows"]

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use async_loader::prelude::*;
use async_loader::utils::async_sleep;

static TITLE: &str = "Async Loader";

#[component]
fn CompHome() -> Element {
    rsx! {
        h2 { "Home" }
        p { "Resolved through the registry, held back by the minimum visible time." }
    }
}

#[component]
fn CompSlow() -> Element {
    let mut clicks = use_signal(|| 0);
    rsx! {
        h2 { "Slow component" }
        button { class: "btn", onclick: move |_| clicks += 1, "Clicked {clicks} times" }
    }
}

#[component]
fn CompFlaky() -> Element {
    rsx! {
        h2 { "Flaky component" }
        p { "Failed once, then resolved by the automatic retry." }
    }
}

fn slow_module(delay_ms: u64) -> Reference<LazyComponent> {
    Reference::factory(move || async move {
        async_sleep(delay_ms).await;
        Ok::<LazyComponent, CCStr>(CompSlow)
    })
}

fn flaky_module() -> Reference<LazyComponent> {
    let calls = Rc::new(Cell::new(0u32));
    Reference::factory(move || {
        calls.set(calls.get() + 1);
        let call = calls.get();
        async move {
            async_sleep(400).await;
            if call == 1 {
                Err(CCStr::from("connection reset"))
            } else {
                Ok::<LazyComponent, CCStr>(CompFlaky)
            }
        }
    })
}

#[allow(non_snake_case)]
fn App() -> Element {
    log::debug!("App reload");

    use_loader_options(
        LoaderOptions::default()
            .with_base_path("~components")
            .with_minimum_visible_time(2000)
            .with_delay_before_loading(200),
    );
    use_module_resolver::<LazyComponent>(
        RegistryResolver::default().register("~components/comp-home", CompHome as LazyComponent),
    );

    let slow = use_hook(|| slow_module(1500));
    let too_slow = use_hook(|| slow_module(5000));
    let flaky = use_hook(flaky_module);

    use_drop(|| log::debug!("App Dropped"));

    rsx! {
        document::Title { "{TITLE}" }
        div { id: "app", class: "text-base p-4 flex flex-col gap-4",
            AsyncLoader { reference: Reference::path("comp-home") }
            AsyncLoader {
                reference: slow,
                on_fallback: |_| log::info!("slow component: placeholder shown"),
                on_resolve: |_| log::info!("slow component: resolved"),
            }
            AsyncLoader {
                reference: too_slow,
                policy: LoadPolicy::default()
                    .with_timeout(Duration::from_millis(1000))
                    .with_max_attempts(1),
                loading: SkeletonLoading as LazyComponent,
                error: SkeletonError as ErrorComponent,
            }
            AsyncLoader {
                reference: flaky,
                policy: LoadPolicy::default()
                    .with_max_attempts(3)
                    .with_auto_retry(Duration::from_millis(500))
                    .with_retry_predicate(|error, _| !error.is_timeout()),
            }
            AsyncLoader { reference: Reference::path("comp-missing") }
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_micros()
        .init();

    log::info!("starting app");
    use dioxus::desktop::{Config, WindowBuilder};
    LaunchBuilder::desktop()
        .with_cfg(
            Config::new().with_menu(None).with_window(
                WindowBuilder::new()
                    .with_title(TITLE)
                    .with_inner_size(dioxus::desktop::LogicalSize::new(1024, 768))
                    .with_resizable(true),
            ),
        )
        .launch(App)
}
