use crate::config::EnvConfig;
use crate::pages::{
    AdminCentersPage, AppLayout, CentersPage, DonationsPage, NotificationsPage, ReportsPage,
};
use crate::state::{AppContext, AppState};
use leptos::prelude::*;
use leptos_router::components::{Route, Router, Routes};
use leptos_router::path;

#[component]
pub fn App(config: EnvConfig) -> impl IntoView {
    let state = AppState::new(config);
    provide_context(AppContext(state));
    on_cleanup(move || state.dispose());

    // IMPORTANT:
    // - Leptos CSR requires the `csr` feature on `leptos`.
    // - list pages read and write `location.search` themselves; the router only picks the page.
    view! {
        <Router>
            <AppLayout>
                <Routes fallback=|| view! { <div class="px-4 py-8 text-xs text-muted-foreground">"Not found"</div> }>
                    <Route path=path!("admin/rckik") view=AdminCentersPage />
                    <Route path=path!("admin/reports") view=ReportsPage />
                    <Route path=path!("dashboard/donations") view=DonationsPage />
                    <Route path=path!("dashboard/notifications") view=NotificationsPage />
                    <Route path=path!("") view=CentersPage />
                </Routes>
            </AppLayout>
        </Router>
    }
}
