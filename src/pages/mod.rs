use crate::list::{ErrorClass, ListPhase, ListViewController, ListViewState};
use crate::models::{Center, Donation, FilterKind, Notification, ScraperReport, SortDirection};
use crate::optimistic::{notification_read_lens, OptimisticCoordinator};
use crate::resources::{
    mark_notification_read_request, AdminCentersResource, CentersResource, DonationsResource,
    ListResource, NotificationsResource, ReportsResource,
};
use crate::state::AppContext;
use crate::storage::{clear_token, load_token, save_token};
use crate::url_state::BrowserHistoryPort;
use leptos::prelude::*;
use leptos_router::components::A;
use std::rc::Rc;

const INPUT_CLASS: &str =
    "h-8 rounded-md border border-border bg-background px-2 text-sm text-foreground";
const BUTTON_CLASS: &str = "h-8 rounded-md border border-border bg-background px-3 text-xs transition-colors hover:bg-surface-hover disabled:opacity-50";
const CELL_CLASS: &str = "px-3 py-2 text-sm";

/// A mounted list controller plus a signal mirroring its state.
pub(crate) struct ListHandle<R: ListResource> {
    controller: StoredValue<ListViewController<R>, LocalStorage>,
    state: RwSignal<ListViewState<R::Item>, LocalStorage>,
}

impl<R: ListResource> Clone for ListHandle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: ListResource> Copy for ListHandle<R> {}

impl<R: ListResource> ListHandle<R> {
    fn with<T>(&self, f: impl FnOnce(&ListViewController<R>) -> T) -> Option<T> {
        self.controller.try_with_value(f)
    }

    fn schema(&self) -> &'static crate::models::QuerySchema {
        self.controller.with_value(|c| c.schema())
    }

    /// Empty input clears the filter.
    fn set_filter(&self, key: &'static str, value: String) {
        let value = (!value.trim().is_empty()).then_some(value);
        self.with(|c| c.set_filter([(key, value)]));
    }

    fn items(&self) -> Vec<R::Item> {
        self.state.with(|s| {
            s.results
                .as_ref()
                .map(|p| p.items.clone())
                .unwrap_or_default()
        })
    }
}

/// Mounts a controller for `resource` on the current URL and tears it down
/// with the owning view.
pub(crate) fn use_list_controller<R: ListResource>(resource: R) -> ListHandle<R> {
    let app_state = expect_context::<AppContext>();
    let deps = app_state.0.services.with_value(|s| s.list_deps());

    let controller = ListViewController::mount(resource, deps, Rc::new(BrowserHistoryPort), None);
    let state = RwSignal::new_local(controller.state());
    controller.subscribe(move |s| {
        let _ = state.try_set(s.clone());
    });

    let controller = StoredValue::new_local(controller);
    on_cleanup(move || {
        let _ = controller.try_with_value(|c| c.teardown());
    });

    ListHandle { controller, state }
}

fn filter_input<R: ListResource>(
    list: ListHandle<R>,
    key: &'static str,
    label: &'static str,
) -> impl IntoView {
    let field = list.schema().field(key).copied();
    let debounced = field.is_some_and(|f| f.debounced);
    let committed = Memo::new(move |_| {
        list.state
            .with(|s| s.query.filter(key).map(str::to_string))
            .unwrap_or_default()
    });

    let control = match field.map(|f| f.kind) {
        Some(FilterKind::Enum(options)) => view! {
            <select
                class=INPUT_CLASS
                prop:value=move || committed.get()
                on:change=move |ev| list.set_filter(key, event_target_value(&ev))
            >
                <option value="">"All"</option>
                {options
                    .iter()
                    .map(|o| view! { <option value=*o>{*o}</option> })
                    .collect_view()}
            </select>
        }
        .into_any(),
        Some(FilterKind::Bool) => view! {
            <select
                class=INPUT_CLASS
                prop:value=move || committed.get()
                on:change=move |ev| list.set_filter(key, event_target_value(&ev))
            >
                <option value="">"All"</option>
                <option value="true">"Yes"</option>
                <option value="false">"No"</option>
            </select>
        }
        .into_any(),
        kind => {
            let input_type = match kind {
                Some(FilterKind::Date) => "date",
                Some(FilterKind::Integer { .. }) => "number",
                _ => "text",
            };
            view! {
                <input
                    r#type=input_type
                    class=INPUT_CLASS
                    prop:value=move || committed.get()
                    on:input=move |ev| {
                        if debounced {
                            list.set_filter(key, event_target_value(&ev));
                        }
                    }
                    on:change=move |ev| {
                        if !debounced {
                            list.set_filter(key, event_target_value(&ev));
                        }
                    }
                />
            }
            .into_any()
        }
    };

    view! {
        <label class="flex flex-col gap-1 text-xs text-muted-foreground">
            {label}
            {control}
        </label>
    }
}

fn sort_header<R: ListResource>(
    list: ListHandle<R>,
    field: &'static str,
    label: &'static str,
) -> impl IntoView {
    let indicator = move || {
        list.state.with(|s| {
            if s.query.sort.field != field {
                ""
            } else if s.query.sort.direction == SortDirection::Asc {
                " ▲"
            } else {
                " ▼"
            }
        })
    };

    view! {
        <th class="px-3 py-2 text-left text-xs font-medium text-muted-foreground">
            <button
                r#type="button"
                class="hover:text-foreground"
                on:click=move |_| {
                    list.with(|c| c.set_sort(field));
                }
            >
                {label}
                {indicator}
            </button>
        </th>
    }
}

fn plain_header(label: &'static str) -> impl IntoView {
    view! { <th class="px-3 py-2 text-left text-xs font-medium text-muted-foreground">{label}</th> }
}

/// Loading line, error box and the clear-filters action.
fn list_status<R: ListResource>(list: ListHandle<R>) -> impl IntoView {
    let error = move || list.state.with(|s| s.error.clone());

    view! {
        <div class="flex items-center justify-between gap-2">
            <span class="text-xs text-muted-foreground">
                {move || {
                    if list.state.with(|s| s.phase() == ListPhase::Loading) { "Loading..." } else { "" }
                }}
            </span>
            <button
                r#type="button"
                class=BUTTON_CLASS
                on:click=move |_| {
                    list.with(|c| c.clear_filters());
                }
            >
                "Clear filters"
            </button>
        </div>
        {move || {
            error()
                .map(|e| {
                    let can_retry = e.class != ErrorClass::ThrottleLimit;
                    view! {
                        <div class="flex items-center justify-between gap-2 rounded-md border border-destructive/30 p-3 text-xs text-destructive">
                            <span>{e.message}</span>
                            <Show when=move || can_retry>
                                <button
                                    r#type="button"
                                    class=BUTTON_CLASS
                                    on:click=move |_| {
                                        list.with(|c| c.refetch());
                                    }
                                >
                                    "Retry"
                                </button>
                            </Show>
                        </div>
                    }
                })
        }}
    }
}

/// One-based page label; the index may come straight from the URL.
fn page_summary(index: u32, pages: u32, total: u64) -> String {
    if pages == 0 {
        return "No results".to_string();
    }
    format!("Page {} of {} · {} results", index.saturating_add(1), pages, total)
}

fn pager<R: ListResource>(list: ListHandle<R>) -> impl IntoView {
    let summary = move || {
        list.state.with(|s| {
            s.results
                .as_ref()
                .map(|p| (p.page_index, p.total_pages, p.total_elements, p.is_first, p.is_last))
        })
    };
    let sizes = list.schema().page_sizes;

    view! {
        <div class="flex items-center justify-between gap-2 text-xs text-muted-foreground">
            <span>
                {move || {
                    summary()
                        .map(|(index, pages, total, _, _)| page_summary(index, pages, total))
                        .unwrap_or_default()
                }}
            </span>
            <div class="flex items-center gap-2">
                <select
                    class=INPUT_CLASS
                    prop:value=move || list.state.with(|s| s.query.page.size.to_string())
                    on:change=move |ev| {
                        if let Ok(size) = event_target_value(&ev).parse::<u32>() {
                            list.with(|c| c.set_page_size(size));
                        }
                    }
                >
                    {sizes
                        .iter()
                        .map(|s| view! { <option value=s.to_string()>{format!("{s} / page")}</option> })
                        .collect_view()}
                </select>
                <button
                    r#type="button"
                    class=BUTTON_CLASS
                    disabled=move || summary().map_or(true, |p| p.3)
                    on:click=move |_| {
                        list.with(|c| c.set_page(c.query().page.index.saturating_sub(1)));
                    }
                >
                    "Previous"
                </button>
                <button
                    r#type="button"
                    class=BUTTON_CLASS
                    disabled=move || summary().map_or(true, |p| p.4)
                    on:click=move |_| {
                        list.with(|c| c.set_page(c.query().page.index.saturating_add(1)));
                    }
                >
                    "Next"
                </button>
            </div>
        </div>
    }
}

fn page_title(title: &'static str, subtitle: &'static str) -> impl IntoView {
    view! {
        <div class="space-y-1">
            <h1 class="text-xl font-semibold">{title}</h1>
            <p class="text-xs text-muted-foreground">{subtitle}</p>
        </div>
    }
}

fn center_rows<R: ListResource<Item = Center>>(list: ListHandle<R>, admin: bool) -> impl IntoView {
    move || {
        list.items()
            .into_iter()
            .map(|c| {
                let status = if c.active { "Active" } else { "Inactive" };
                let updated = c.updated_at.unwrap_or_default();
                view! {
                    <tr class="border-t border-border">
                        <td class=CELL_CLASS>{c.name}</td>
                        <td class=CELL_CLASS>{c.city}</td>
                        <td class=CELL_CLASS>{c.code}</td>
                        <td class=CELL_CLASS>{c.address.unwrap_or_default()}</td>
                        <td class=CELL_CLASS>{status}</td>
                        {admin.then(|| view! { <td class=CELL_CLASS>{updated}</td> })}
                    </tr>
                }
            })
            .collect_view()
    }
}

#[component]
pub fn CentersPage() -> impl IntoView {
    let list = use_list_controller(CentersResource);

    view! {
        <div class="space-y-4">
            {page_title("Blood donation centers", "Find a regional blood donation center (RCKiK).")}
            <div class="flex flex-wrap items-end gap-3">
                {filter_input(list, "search", "Search")}
                {filter_input(list, "city", "City")}
                {filter_input(list, "active", "Active")}
            </div>
            {list_status(list)}
            <table class="w-full rounded-md border border-border">
                <thead>
                    <tr>
                        {sort_header(list, "name", "Name")}
                        {sort_header(list, "city", "City")}
                        {sort_header(list, "code", "Code")}
                        {plain_header("Address")}
                        {plain_header("Status")}
                    </tr>
                </thead>
                <tbody>{center_rows(list, false)}</tbody>
            </table>
            {pager(list)}
        </div>
    }
}

#[component]
pub fn AdminCentersPage() -> impl IntoView {
    let list = use_list_controller(AdminCentersResource);

    view! {
        <div class="space-y-4">
            {page_title("RCKiK management", "All centers, including inactive ones.")}
            <div class="flex flex-wrap items-end gap-3">
                {filter_input(list, "search", "Search")}
                {filter_input(list, "city", "City")}
                {filter_input(list, "active", "Active")}
            </div>
            {list_status(list)}
            <table class="w-full rounded-md border border-border">
                <thead>
                    <tr>
                        {sort_header(list, "name", "Name")}
                        {sort_header(list, "city", "City")}
                        {sort_header(list, "code", "Code")}
                        {plain_header("Address")}
                        {plain_header("Status")}
                        {sort_header(list, "updatedAt", "Updated")}
                    </tr>
                </thead>
                <tbody>{center_rows(list, true)}</tbody>
            </table>
            {pager(list)}
        </div>
    }
}

#[component]
pub fn ReportsPage() -> impl IntoView {
    let list = use_list_controller(ReportsResource);

    let rows = move || {
        list.items()
            .into_iter()
            .map(|r: ScraperReport| {
                let center = r
                    .rckik_name
                    .clone()
                    .or_else(|| r.rckik_id.map(|id| format!("#{id}")))
                    .unwrap_or_default();
                view! {
                    <tr class="border-t border-border">
                        <td class=CELL_CLASS>{r.created_at}</td>
                        <td class=CELL_CLASS>{r.status}</td>
                        <td class=CELL_CLASS>{center}</td>
                        <td class=CELL_CLASS>{r.message.unwrap_or_default()}</td>
                    </tr>
                }
            })
            .collect_view()
    };

    view! {
        <div class="space-y-4">
            {page_title("Scraper reports", "Runs of the blood level scraper.")}
            <div class="flex flex-wrap items-end gap-3">
                {filter_input(list, "search", "Search")}
                {filter_input(list, "status", "Status")}
                {filter_input(list, "rckikId", "RCKiK id")}
                {filter_input(list, "dateFrom", "From")}
                {filter_input(list, "dateTo", "To")}
            </div>
            {list_status(list)}
            <table class="w-full rounded-md border border-border">
                <thead>
                    <tr>
                        {sort_header(list, "createdAt", "Created")}
                        {sort_header(list, "status", "Status")}
                        {plain_header("Center")}
                        {plain_header("Message")}
                    </tr>
                </thead>
                <tbody>{rows}</tbody>
            </table>
            {pager(list)}
        </div>
    }
}

#[component]
pub fn DonationsPage() -> impl IntoView {
    let list = use_list_controller(DonationsResource);

    let rows = move || {
        list.items()
            .into_iter()
            .map(|d: Donation| {
                let quantity = d.quantity_ml.map(|q| format!("{q} ml")).unwrap_or_default();
                view! {
                    <tr class="border-t border-border">
                        <td class=CELL_CLASS>{d.donation_date}</td>
                        <td class=CELL_CLASS>{d.rckik_name.unwrap_or_default()}</td>
                        <td class=CELL_CLASS>{d.donation_type.unwrap_or_default()}</td>
                        <td class=CELL_CLASS>{quantity}</td>
                    </tr>
                }
            })
            .collect_view()
    };

    view! {
        <div class="space-y-4">
            {page_title("My donations", "Your donation diary.")}
            <div class="flex flex-wrap items-end gap-3">
                {filter_input(list, "rckikId", "RCKiK id")}
                {filter_input(list, "dateFrom", "From")}
                {filter_input(list, "dateTo", "To")}
            </div>
            {list_status(list)}
            <table class="w-full rounded-md border border-border">
                <thead>
                    <tr>
                        {sort_header(list, "donationDate", "Date")}
                        {plain_header("Center")}
                        {plain_header("Type")}
                        {sort_header(list, "quantityMl", "Quantity")}
                    </tr>
                </thead>
                <tbody>{rows}</tbody>
            </table>
            {pager(list)}
        </div>
    }
}

#[component]
pub fn NotificationsPage() -> impl IntoView {
    let app_state = expect_context::<AppContext>();
    let list = use_list_controller(NotificationsResource);

    let (scheduler, transport) = app_state
        .0
        .services
        .with_value(|s| (Rc::clone(&s.scheduler), Rc::clone(&s.transport)));

    let items: RwSignal<Vec<Notification>> = RwSignal::new(vec![]);
    let saving: RwSignal<Vec<i64>> = RwSignal::new(vec![]);
    let coordinator = OptimisticCoordinator::new(Vec::new(), notification_read_lens(), scheduler);
    coordinator.on_change(move |all, pending| {
        let _ = items.try_set(all.to_vec());
        let _ = saving.try_set(pending.iter().map(|e| e.target_id).collect());
    });
    coordinator.on_failure(move |_err| {
        app_state
            .0
            .toast("Could not mark the notification as read. Please try again.");
    });
    let coordinator = StoredValue::new_local(coordinator);
    let transport = StoredValue::new_local(transport);

    // Every fetched page replaces the optimistic collection.
    Effect::new(move |_| {
        let fetched = list
            .state
            .with(|s| s.results.as_ref().map(|p| p.items.clone()));
        if let Some(fetched) = fetched {
            coordinator.with_value(|c| c.replace_items(fetched));
        }
    });
    on_cleanup(move || {
        let _ = coordinator.try_with_value(|c| c.teardown());
    });

    let mark_read = move |id: i64| {
        let Some(transport) = transport.try_get_value() else {
            return;
        };
        let req = mark_notification_read_request(id);
        coordinator.with_value(|c| {
            c.apply(id, true, async move { transport.send(&req).await });
        });
    };

    let unread = move || items.with(|all| all.iter().filter(|n| !n.read).count());

    view! {
        <div class="space-y-4">
            {page_title("Notifications", "Blood level alerts and account messages.")}
            <div class="flex flex-wrap items-end gap-3">
                {filter_input(list, "unreadOnly", "Unread only")}
                <span class="text-xs text-muted-foreground">{move || format!("{} unread", unread())}</span>
            </div>
            {list_status(list)}
            <div class="space-y-1">
                <For
                    each=move || items.get()
                    key=|n| (n.id, n.read)
                    children=move |n: Notification| {
                        let id = n.id;
                        let read = n.read;
                        view! {
                            <div class="flex items-start justify-between gap-2 rounded-md border border-border bg-background px-3 py-2">
                                <div class="min-w-0">
                                    <div class="truncate text-sm font-medium">{n.title}</div>
                                    <div class="text-xs text-muted-foreground">{n.message}</div>
                                    <div class="text-xs text-muted-foreground">
                                        {n.created_at}
                                        {move || saving.with(|ids| ids.contains(&id)).then_some(" · saving...")}
                                    </div>
                                </div>
                                <Show when=move || !read>
                                    <button
                                        r#type="button"
                                        class=BUTTON_CLASS
                                        on:click=move |_| mark_read(id)
                                    >
                                        "Mark as read"
                                    </button>
                                </Show>
                            </div>
                        }
                    }
                />
            </div>
            {pager(list)}
        </div>
    }
}

#[component]
pub fn ConnectivityBanner() -> impl IntoView {
    let app_state = expect_context::<AppContext>();

    move || {
        app_state.0.banner.get().map(|message| {
            view! {
                <div class="flex items-center justify-between gap-2 border-b border-destructive/30 bg-muted px-4 py-2 text-xs text-destructive">
                    <span>{message}</span>
                    <button
                        r#type="button"
                        class=BUTTON_CLASS
                        on:click=move |_| app_state.0.dismiss_banner()
                    >
                        "Dismiss"
                    </button>
                </div>
            }
        })
    }
}

#[component]
pub fn Toasts() -> impl IntoView {
    let app_state = expect_context::<AppContext>();

    view! {
        <div class="fixed bottom-4 right-4 flex w-80 flex-col gap-2">
            <For
                each=move || app_state.0.toasts.get()
                key=|t| t.id
                children=move |t| {
                    let id = t.id;
                    view! {
                        <div class="flex items-start justify-between gap-2 rounded-md border border-border bg-background px-3 py-2 text-xs shadow">
                            <span>{t.message}</span>
                            <button
                                r#type="button"
                                class="text-muted-foreground hover:text-foreground"
                                on:click=move |_| app_state.0.dismiss_toast(id)
                            >
                                "×"
                            </button>
                        </div>
                    }
                }
            />
        </div>
    }
}

/// Paste-a-token sign in; the list views only need the bearer token.
#[component]
pub fn SessionPanel() -> impl IntoView {
    let signed_in: RwSignal<bool> = RwSignal::new(load_token().is_some());
    let token: RwSignal<String> = RwSignal::new(String::new());

    let on_submit = move |ev: leptos::ev::SubmitEvent| {
        ev.prevent_default();
        let value = token.get_untracked();
        if value.trim().is_empty() {
            return;
        }
        save_token(value.trim());
        token.set(String::new());
        signed_in.set(true);
    };

    view! {
        <Show
            when=move || signed_in.get()
            fallback=move || view! {
                <form class="flex items-center gap-2" on:submit=on_submit>
                    <input
                        r#type="password"
                        class=INPUT_CLASS
                        placeholder="Access token"
                        prop:value=move || token.get()
                        on:input=move |ev| token.set(event_target_value(&ev))
                    />
                    <button r#type="submit" class=BUTTON_CLASS>"Sign in"</button>
                </form>
            }
        >
            <button
                r#type="button"
                class=BUTTON_CLASS
                on:click=move |_| {
                    clear_token();
                    signed_in.set(false);
                }
            >
                "Sign out"
            </button>
        </Show>
    }
}

#[component]
pub fn AppLayout(children: Children) -> impl IntoView {
    let link = "text-sm text-muted-foreground hover:text-foreground";

    view! {
        <div class="min-h-screen bg-background">
            <ConnectivityBanner />
            <header class="flex items-center justify-between gap-4 border-b border-border px-4 py-3">
                <nav class="flex items-center gap-4">
                    <A href="/" attr:class=link>"Centers"</A>
                    <A href="/dashboard/donations" attr:class=link>"Donations"</A>
                    <A href="/dashboard/notifications" attr:class=link>"Notifications"</A>
                    <A href="/admin/rckik" attr:class=link>"RCKiK admin"</A>
                    <A href="/admin/reports" attr:class=link>"Reports"</A>
                </nav>
                <SessionPanel />
            </header>
            <main class="mx-auto w-full max-w-5xl px-4 py-6">{children()}</main>
            <Toasts />
        </div>
    }
}
